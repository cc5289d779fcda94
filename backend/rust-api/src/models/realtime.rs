use serde::{Deserialize, Serialize};

use super::notification::NotificationView;

/// Frames sent by the browser over the realtime socket
#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(tag = "event", content = "data", rename_all = "camelCase")]
pub enum ClientEvent {
    Register {
        token: String,
    },
    #[serde(rename_all = "camelCase")]
    MarkNotificationRead {
        #[serde(alias = "notification_id")]
        notification_id: String,
    },
    Ping,
}

/// Frames pushed to the browser
#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(tag = "event", content = "data", rename_all = "camelCase")]
pub enum ServerEvent {
    #[serde(rename_all = "camelCase")]
    Registered { user_id: String },
    NewNotification(NotificationView),
    #[serde(rename_all = "camelCase")]
    NotificationRead { notification_id: String },
    Pong,
    Error { message: String },
}

impl ServerEvent {
    pub fn error(message: impl Into<String>) -> Self {
        ServerEvent::Error {
            message: message.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_client_events_parse() {
        let register: ClientEvent =
            serde_json::from_value(json!({"event": "register", "data": {"token": "abc"}})).unwrap();
        assert_eq!(
            register,
            ClientEvent::Register {
                token: "abc".into()
            }
        );

        let read: ClientEvent = serde_json::from_value(
            json!({"event": "markNotificationRead", "data": {"notificationId": "42"}}),
        )
        .unwrap();
        assert_eq!(
            read,
            ClientEvent::MarkNotificationRead {
                notification_id: "42".into()
            }
        );

        let ping: ClientEvent = serde_json::from_value(json!({"event": "ping"})).unwrap();
        assert_eq!(ping, ClientEvent::Ping);
    }

    #[test]
    fn test_unknown_event_rejected() {
        assert!(serde_json::from_value::<ClientEvent>(json!({"event": "shout"})).is_err());
    }

    #[test]
    fn test_server_event_shape() {
        let value = serde_json::to_value(ServerEvent::Registered {
            user_id: "u1".into(),
        })
        .unwrap();
        assert_eq!(value, json!({"event": "registered", "data": {"userId": "u1"}}));

        let pong = serde_json::to_value(ServerEvent::Pong).unwrap();
        assert_eq!(pong, json!({"event": "pong"}));
    }
}
