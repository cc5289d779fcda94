use axum::{
    extract::DefaultBodyLimit,
    http::{header, HeaderValue, Method},
    middleware,
    routing::{delete, get, post, put},
    Router,
};
use std::sync::Arc;
use tower_http::{
    compression::CompressionLayer,
    cors::{AllowOrigin, CorsLayer},
    services::ServeDir,
    trace::TraceLayer,
};

pub mod config;
pub mod error;
pub mod extractors;
pub mod handlers;
pub mod metrics;
pub mod middlewares;
pub mod models;
pub mod services;
pub mod utils;

pub use config::Config;
pub use services::AppState;

/// Multipart framing on top of the file itself
const BODY_LIMIT_OVERHEAD: usize = 1024 * 1024;

fn cors_layer(origin: &str) -> CorsLayer {
    let allow_origin = match HeaderValue::from_str(origin) {
        Ok(value) if origin != "*" => AllowOrigin::exact(value),
        _ => AllowOrigin::any(),
    };

    CorsLayer::new()
        .allow_methods([
            Method::GET,
            Method::POST,
            Method::PUT,
            Method::DELETE,
            Method::OPTIONS,
        ])
        .allow_headers([header::AUTHORIZATION, header::CONTENT_TYPE])
        .allow_origin(allow_origin)
}

pub fn create_router(app_state: Arc<AppState>) -> Router {
    let cors = cors_layer(&app_state.config.client_origin);
    let body_limit = app_state.config.uploads.max_bytes + BODY_LIMIT_OVERHEAD;
    let uploads = ServeDir::new(app_state.storage.root());

    Router::new()
        // Public endpoints (no auth required)
        .route("/health", get(handlers::health_check))
        .route(
            "/metrics",
            get(handlers::metrics_handler).layer(middleware::from_fn_with_state(
                app_state.clone(),
                handlers::metrics_auth_middleware,
            )),
        )
        .nest("/api/auth", auth_routes(app_state.clone()))
        // Authenticates inside the socket (query token or register event)
        .route("/api/realtime", get(handlers::realtime::realtime_socket))
        .nest_service("/uploads", uploads)
        .nest(
            "/api",
            api_routes().route_layer(middleware::from_fn_with_state(
                app_state.clone(),
                middlewares::auth::auth_middleware,
            )),
        )
        .with_state(app_state)
        .layer(DefaultBodyLimit::max(body_limit))
        .layer(middleware::from_fn(middlewares::metrics::metrics_middleware))
        .layer(middleware::from_fn(
            middlewares::trace::trace_context_middleware,
        ))
        .layer(CompressionLayer::new())
        .layer(TraceLayer::new_for_http())
        .layer(cors)
}

fn auth_routes(app_state: Arc<AppState>) -> Router<Arc<AppState>> {
    // Public routes with rate limiting
    let register_route = Router::new()
        .route("/register", post(handlers::auth::register))
        .route_layer(middleware::from_fn_with_state(
            app_state.clone(),
            middlewares::rate_limit::register_rate_limit_middleware,
        ));

    let login_route = Router::new()
        .route("/login", post(handlers::auth::login))
        .route_layer(middleware::from_fn_with_state(
            app_state.clone(),
            middlewares::rate_limit::login_rate_limit_middleware,
        ));

    let refresh_route = Router::new().route("/refresh", post(handlers::auth::refresh_token));

    let protected_routes = Router::new()
        .route("/me", get(handlers::auth::get_current_user))
        .route("/logout", post(handlers::auth::logout))
        .route("/change-password", post(handlers::auth::change_password))
        .route_layer(middleware::from_fn_with_state(
            app_state,
            middlewares::auth::auth_middleware,
        ));

    register_route
        .merge(login_route)
        .merge(refresh_route)
        .merge(protected_routes)
}

fn api_routes() -> Router<Arc<AppState>> {
    Router::new()
        .merge(user_routes())
        .merge(school_routes())
        .merge(section_routes())
        .merge(course_routes())
        .merge(assignment_routes())
        .merge(quiz_routes())
        .merge(attendance_routes())
        .merge(timetable_routes())
        .merge(notification_routes())
        .nest("/settings", settings_routes())
}

fn user_routes() -> Router<Arc<AppState>> {
    use handlers::users;

    Router::new()
        .route("/users", get(users::list_users).post(users::create_user))
        .route(
            "/users/{id}",
            get(users::get_user)
                .put(users::update_user)
                .delete(users::delete_user),
        )
        .route("/users/{id}/reset-password", post(users::reset_password))
        .route("/users/{id}/payments", get(users::get_payments))
        .route("/users/{id}/payments/{period}", put(users::update_payment))
}

fn school_routes() -> Router<Arc<AppState>> {
    use handlers::schools;

    Router::new()
        .route(
            "/schools",
            get(schools::list_schools).post(schools::create_school),
        )
        .route(
            "/schools/{id}",
            get(schools::get_school)
                .put(schools::update_school)
                .delete(schools::delete_school),
        )
}

fn section_routes() -> Router<Arc<AppState>> {
    use handlers::sections;

    Router::new()
        .route(
            "/sections",
            get(sections::list_sections).post(sections::create_section),
        )
        .route(
            "/sections/{id}",
            get(sections::get_section)
                .put(sections::update_section)
                .delete(sections::delete_section),
        )
        .route("/sections/{id}/students", post(sections::add_student))
        .route(
            "/sections/{id}/students/{student_id}",
            delete(sections::remove_student),
        )
}

fn course_routes() -> Router<Arc<AppState>> {
    use handlers::{assignments, courses};

    Router::new()
        .route(
            "/courses",
            get(courses::list_courses).post(courses::create_course),
        )
        .route(
            "/courses/{id}",
            get(courses::get_course)
                .put(courses::update_course)
                .delete(courses::delete_course),
        )
        .route("/courses/{id}/students", post(courses::enroll_students))
        .route(
            "/courses/{id}/students/{student_id}",
            delete(courses::unenroll_student),
        )
        .route("/courses/{id}/enroll-section", post(courses::enroll_section))
        .route("/courses/{id}/teachers", post(courses::assign_teacher))
        .route(
            "/courses/{id}/teachers/{teacher_id}",
            delete(courses::remove_teacher),
        )
        .route(
            "/courses/{id}/assignments",
            get(assignments::list_assignments),
        )
}

fn assignment_routes() -> Router<Arc<AppState>> {
    use handlers::assignments;

    Router::new()
        .route("/assignments", post(assignments::create_assignment))
        .route(
            "/assignments/{id}",
            get(assignments::get_assignment)
                .put(assignments::update_assignment)
                .delete(assignments::delete_assignment),
        )
        .route(
            "/assignments/{id}/submissions",
            get(assignments::list_submissions).post(assignments::submit_assignment),
        )
        .route("/submissions/{id}/grade", put(assignments::grade_submission))
}

fn quiz_routes() -> Router<Arc<AppState>> {
    use handlers::quizzes;

    Router::new()
        .route(
            "/quizzes",
            get(quizzes::list_quizzes).post(quizzes::create_quiz),
        )
        .route(
            "/quizzes/{id}",
            get(quizzes::get_quiz)
                .put(quizzes::update_quiz)
                .delete(quizzes::delete_quiz),
        )
        .route("/quizzes/{id}/attempts", post(quizzes::submit_attempt))
        .route(
            "/quizzes/{id}/submissions",
            get(quizzes::list_quiz_submissions),
        )
        .route(
            "/quizzes/{id}/my-submission",
            get(quizzes::my_quiz_submission),
        )
}

fn attendance_routes() -> Router<Arc<AppState>> {
    use handlers::attendance;

    Router::new()
        .route(
            "/attendance",
            get(attendance::query_attendance).put(attendance::mark_attendance),
        )
        .route(
            "/attendance/students/{id}/summary",
            get(attendance::attendance_summary),
        )
}

fn timetable_routes() -> Router<Arc<AppState>> {
    use handlers::timetable;

    Router::new()
        .route(
            "/timetable",
            get(timetable::list_entries).post(timetable::create_entry),
        )
        .route(
            "/timetable/{id}",
            put(timetable::update_entry).delete(timetable::delete_entry),
        )
}

fn notification_routes() -> Router<Arc<AppState>> {
    use handlers::notifications;

    Router::new()
        .route(
            "/notifications",
            get(notifications::list_my_notifications).post(notifications::create_notification),
        )
        .route(
            "/notifications/unread-count",
            get(notifications::unread_count),
        )
        .route("/notifications/sent", get(notifications::list_sent))
        .route("/notifications/read-all", put(notifications::mark_all_read))
        .route(
            "/notifications/{id}",
            delete(notifications::delete_notification),
        )
        .route("/notifications/{id}/read", put(notifications::mark_read))
}

/// Every settings route shares one rule, so it is enforced at the router
fn settings_routes() -> Router<Arc<AppState>> {
    Router::new()
        .route(
            "/due-dates",
            get(handlers::settings::get_due_dates).put(handlers::settings::update_due_dates),
        )
        .route_layer(middleware::from_fn_with_state(
            &middlewares::auth::MANAGE_SETTINGS,
            middlewares::auth::access_guard,
        ))
}
