use std::future::ready;
use std::sync::Arc;

use axum::{routing::get, Router};
use tower_http::trace::TraceLayer;

use crate::instrument::track_requests;
use crate::prometheus::setup_metrics_recorder;
use crate::users::{self, UserDirectory, UserStore};

#[derive(Clone)]
pub struct AppState {
    pub directory: Arc<dyn UserDirectory + Send + Sync>,
    pub store: Arc<dyn UserStore + Send + Sync>,
}

async fn index() -> &'static str {
    "users-api"
}

pub fn router<D, S>(directory: D, store: S, metrics: bool) -> Router
where
    D: UserDirectory + Send + Sync + 'static,
    S: UserStore + Send + Sync + 'static,
{
    let state = AppState {
        directory: Arc::new(directory),
        store: Arc::new(store),
    };

    // Business routes get the full instrumentation wrapper; /status stays
    // outside it so the liveness probe works without a datastore, a trace
    // sink or a metrics recorder.
    let instrumented = Router::new()
        .route(
            "/users",
            get(users::handler::list).post(users::handler::create),
        )
        .layer(axum::middleware::from_fn(track_requests));

    let router = Router::new()
        .route("/", get(index))
        .route("/status", get(health::status))
        .merge(instrumented)
        .layer(TraceLayer::new_for_http())
        .with_state(state);

    // Don't install metrics unless asked to
    // Installing a global recorder when the crate is used as a library
    // (during tests etc) does not work well.
    if metrics {
        if let Some(recorder_handle) = setup_metrics_recorder() {
            return router.route("/metrics", get(move || ready(recorder_handle.render())));
        }
    }
    router
}

#[cfg(test)]
mod tests {
    use super::*;

    use async_trait::async_trait;
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use http_body_util::BodyExt;
    use tower::ServiceExt;

    use crate::users::{NewUser, User};

    struct StubDirectory {
        fail: bool,
    }

    #[async_trait]
    impl UserDirectory for StubDirectory {
        async fn list_users(&self) -> anyhow::Result<Vec<User>> {
            if self.fail {
                anyhow::bail!("connection reset by peer")
            }
            Ok(vec![User {
                id: 1,
                name: "Leanne Graham".to_string(),
                email: "leanne@example.com".to_string(),
                phone: "1-770-736-8031".to_string(),
                website: "hildegard.org".to_string(),
            }])
        }
    }

    struct StubStore;

    #[async_trait]
    impl UserStore for StubStore {
        async fn save(&self, _user: &NewUser) -> anyhow::Result<()> {
            Ok(())
        }
    }

    fn test_router(directory_fails: bool) -> Router {
        router(
            StubDirectory {
                fail: directory_fails,
            },
            StubStore,
            false,
        )
    }

    #[tokio::test]
    async fn status_returns_200_up_and_running() {
        let response = test_router(false)
            .oneshot(
                Request::builder()
                    .uri("/status")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let body = response.into_body().collect().await.unwrap().to_bytes();
        assert_eq!(&body[..], b"up and running");
    }

    #[tokio::test]
    async fn users_listing_proxies_the_directory() {
        let response = test_router(false)
            .oneshot(Request::builder().uri("/users").body(Body::empty()).unwrap())
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let body = response.into_body().collect().await.unwrap().to_bytes();
        let users: Vec<User> = serde_json::from_slice(&body).unwrap();
        assert_eq!(users.len(), 1);
        assert_eq!(users[0].name, "Leanne Graham");
    }

    #[tokio::test]
    async fn directory_failure_maps_to_502() {
        let response = test_router(true)
            .oneshot(Request::builder().uri("/users").body(Body::empty()).unwrap())
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::BAD_GATEWAY);
    }

    #[tokio::test]
    async fn create_user_returns_201() {
        let body = serde_json::to_vec(&NewUser {
            name: "Ervin Howell".to_string(),
            email: "ervin@example.com".to_string(),
            phone: "010-692-6593".to_string(),
            website: "anastasia.net".to_string(),
        })
        .unwrap();

        let response = test_router(false)
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/users")
                    .header("content-type", "application/json")
                    .body(Body::from(body))
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::CREATED);
    }
}
