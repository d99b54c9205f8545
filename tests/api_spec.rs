use axum::http::{header, HeaderValue, StatusCode};
use axum_test::multipart::{MultipartForm, Part};
use axum_test::TestServer;
use polyred::api::{create_router, LoopbackConfig, LoopbackState};
use polyred::client::wire::*;
use polyred::Credential;
use serde_json::json;

fn setup() -> (TestServer, LoopbackState) {
    let state = LoopbackState::new(LoopbackConfig::default());
    let server = TestServer::new(create_router(state.clone())).expect("Failed to create test server");
    (server, state)
}

async fn configured(server: &TestServer, state: &LoopbackState) -> String {
    let id = state.insert_model(vec![7u8; 100]);
    server
        .post(&format!("/config/{}", id))
        .json(&json!({ "percent": { "body": 0.5 } }))
        .await
        .assert_status_ok();
    id
}

mod health {
    use super::*;

    #[tokio::test]
    async fn reports_version() {
        let (server, _) = setup();
        let health: HealthStatus = server.get("/health").await.json();
        assert_eq!(health.version, env!("CARGO_PKG_VERSION"));
    }

    #[tokio::test]
    async fn requires_credential_when_configured() {
        let state = LoopbackState::new(
            LoopbackConfig::default().with_credential(Credential::new("alice", "pw")),
        );
        let server = TestServer::new(create_router(state)).unwrap();

        server.get("/health").await.assert_status(StatusCode::UNAUTHORIZED);
        server
            .get("/health")
            .add_header(header::AUTHORIZATION, HeaderValue::from_static("Basic YWxpY2U6cHc="))
            .await
            .assert_status_ok();
    }
}

mod upload {
    use super::*;

    #[tokio::test]
    async fn returns_a_new_id() {
        let (server, state) = setup();
        let form = MultipartForm::new()
            .add_part("file", Part::bytes(vec![1u8, 2, 3]).file_name("teapot.FBX"));

        let body: IdResponse = server.post("/upload").multipart(form).await.json();
        assert!(!body.id.is_empty());
        assert_eq!(state.unrated(&body.id), Some(0));
    }

    #[tokio::test]
    async fn rejects_other_formats_with_a_message() {
        let (server, _) = setup();
        let form = MultipartForm::new()
            .add_part("file", Part::bytes(vec![1u8, 2, 3]).file_name("teapot.obj"));

        let response = server.post("/upload").multipart(form).await;
        response.assert_status_bad_request();
        let body: MessageBody = response.json();
        assert_eq!(body.message.as_deref(), Some("unsupported model format"));
    }
}

mod sessions {
    use super::*;

    #[tokio::test]
    async fn run_requires_configuration() {
        let (server, state) = setup();
        let id = state.insert_model(vec![7u8; 100]);

        let response = server.post(&format!("/run/{}", id)).await;
        response.assert_status_bad_request();
        let body: MessageBody = response.json();
        assert_eq!(body.message.as_deref(), Some("session is not configured"));
    }

    #[tokio::test]
    async fn run_then_inspect_then_evaluate() {
        let (server, state) = setup();
        let id = configured(&server, &state).await;

        let run: RunResponse = server.post(&format!("/run/{}", id)).await.json();
        assert_eq!(run.ids.len(), 3);
        assert_eq!(run.optimal, 0.5);

        let pending: InspectResponse = server.get(&format!("/evaluate/{}", id)).await.json();
        assert_eq!(pending.ids.len(), 3);

        let first: EvaluateRequest = [(run.ids[0].clone(), 4.0)].into_iter().collect();
        server
            .put(&format!("/evaluate/{}", id))
            .json(&first)
            .await
            .assert_status_ok();

        let pending: InspectResponse = server.get(&format!("/evaluate/{}", id)).await.json();
        assert_eq!(pending.ids.len(), 2);
        assert!(!pending.ids.contains(&run.ids[0]));

        let again = server
            .put(&format!("/evaluate/{}", id))
            .json(&first)
            .await;
        again.assert_status_bad_request();
    }

    #[tokio::test]
    async fn phase_downloads_shrink_with_each_step() {
        let (server, state) = setup();
        let id = configured(&server, &state).await;
        let run: RunResponse = server.post(&format!("/run/{}", id)).await.json();

        let sizes: Vec<usize> = {
            let mut sizes = Vec::new();
            for phase in &run.ids {
                let response = server.get(&format!("/download/{}/{}", id, phase)).await;
                response.assert_status_ok();
                sizes.push(response.as_bytes().len());
            }
            sizes
        };
        assert!(sizes.windows(2).all(|w| w[0] > w[1]));
        assert_eq!(sizes[2], 50);
    }

    #[tokio::test]
    async fn reset_echoes_the_id_and_drops_phases() {
        let (server, state) = setup();
        let id = configured(&server, &state).await;
        server.post(&format!("/run/{}", id)).await.assert_status_ok();

        let body: IdResponse = server.post(&format!("/reset/{}", id)).await.json();
        assert_eq!(body.id, id);
        assert_eq!(state.unrated(&id), Some(0));
        server
            .post(&format!("/run/{}", id))
            .await
            .assert_status_bad_request();
    }

    #[tokio::test]
    async fn copy_mints_an_unconfigured_branch() {
        let (server, state) = setup();
        let id = configured(&server, &state).await;

        let body: IdResponse = server.post(&format!("/copy/{}", id)).await.json();
        assert_ne!(body.id, id);
        server
            .post(&format!("/run/{}", body.id))
            .await
            .assert_status_bad_request();
    }

    #[tokio::test]
    async fn unknown_session_is_not_found_with_message() {
        let (server, _) = setup();
        let response = server.post("/copy/ghost").await;
        response.assert_status_not_found();
        let body: MessageBody = response.json();
        assert_eq!(body.message.as_deref(), Some("session ghost not found"));
    }

    #[tokio::test]
    async fn malformed_config_is_a_bad_request_with_message() {
        let (server, state) = setup();
        let id = state.insert_model(vec![7u8; 100]);

        let response = server
            .post(&format!("/config/{}", id))
            .json(&json!({ "ratios": { "body": 0.5 } }))
            .await;
        response.assert_status_bad_request();
        let body: MessageBody = response.json();
        assert!(body.message.is_some());
    }
}
