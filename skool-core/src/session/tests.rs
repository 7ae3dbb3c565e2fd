use std::{
    collections::VecDeque,
    sync::{Arc, Mutex},
    time::Duration,
};

use tokio::sync::{Notify, Semaphore};
use wiremock::{
    Mock, MockServer, ResponseTemplate,
    matchers::{body_json, header, method, path},
};

use super::*;
use crate::{
    client::ApiClientBuilder,
    retry::RetryPolicy,
    token_store::{MemorySlot, TokenStore},
};

type Reply = std::result::Result<CreateSessionResponse, LoginError>;

/// Scripted backend recording every request
#[derive(Default)]
struct MockBackend {
    replies: Mutex<VecDeque<Reply>>,
    requests: Mutex<Vec<CreateSessionRequest>>,
    revoked: Mutex<Vec<String>>,
    /// When set, each exchange waits for a permit before answering
    gate: Option<Arc<Semaphore>>,
    entered: Arc<Notify>,
}

impl MockBackend {
    fn replying(replies: impl IntoIterator<Item = Reply>) -> Self {
        Self {
            replies: Mutex::new(replies.into_iter().collect()),
            ..Self::default()
        }
    }

    fn gated(mut self, gate: &Arc<Semaphore>) -> Self {
        self.gate = Some(Arc::clone(gate));
        self
    }

    fn calls(&self) -> usize {
        self.requests.lock().unwrap().len()
    }
}

#[async_trait]
impl AuthBackend for MockBackend {
    async fn create_session(&self, request: &CreateSessionRequest) -> Reply {
        self.requests.lock().unwrap().push(request.clone());
        self.entered.notify_one();
        if let Some(gate) = &self.gate {
            gate.acquire().await.unwrap().forget();
        }
        self.replies
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Err(LoginError::Unavailable("no scripted reply".into())))
    }

    async fn end_session(&self, session_token: &str) -> Result<()> {
        self.revoked.lock().unwrap().push(session_token.to_string());
        Ok(())
    }
}

fn granted(session: &str, login: Option<&str>) -> Reply {
    Ok(CreateSessionResponse {
        session_token: session.to_string(),
        login_token: login.map(str::to_string),
    })
}

fn store_with(login: Option<&str>, session: Option<&str>) -> TokenStore {
    let mut login_slot = MemorySlot::durable();
    if let Some(token) = login {
        login_slot = login_slot.with_value(token);
    }
    let mut session_slot = MemorySlot::new();
    if let Some(token) = session {
        session_slot = session_slot.with_value(token);
    }
    TokenStore::new(Arc::new(login_slot), Arc::new(session_slot))
}

#[test]
fn initial_phase_follows_stored_tokens() {
    let anonymous = SessionManager::new(MockBackend::default(), store_with(None, None));
    assert_eq!(anonymous.phase(), SessionPhase::AnonymousNoCredential);
    assert_eq!(anonymous.state(), AuthState::default());

    let renewing = SessionManager::new(MockBackend::default(), store_with(Some("rt"), None));
    assert_eq!(renewing.phase(), SessionPhase::Renewing);
    assert!(renewing.state().loading);
    assert!(!renewing.state().authenticated);

    let restored = SessionManager::new(MockBackend::default(), store_with(Some("rt"), Some("st")));
    assert_eq!(restored.phase(), SessionPhase::Authenticated);
    assert!(restored.state().authenticated);
}

#[tokio::test]
async fn login_stores_rotated_and_session_tokens() {
    let manager = SessionManager::new(
        MockBackend::replying([granted("session-1", Some("login-1"))]),
        store_with(None, None),
    );
    let mut states = manager.subscribe();

    manager.login("anna", "hunter2").await.unwrap();

    assert_eq!(manager.store().login_token().as_deref(), Some("login-1"));
    assert_eq!(manager.store().session_token().as_deref(), Some("session-1"));
    assert_eq!(manager.phase(), SessionPhase::Authenticated);
    assert!(states.has_changed().unwrap());
    let state = *states.borrow_and_update();
    assert_eq!(
        state,
        AuthState {
            authenticated: true,
            loading: false,
            logged_out: false,
        }
    );
    assert_eq!(
        manager.backend().requests.lock().unwrap()[0],
        CreateSessionRequest::Password {
            username: "anna".into(),
            password: "hunter2".into(),
        }
    );
}

#[tokio::test]
async fn login_without_login_token_keeps_existing_one() {
    let manager = SessionManager::new(
        MockBackend::replying([granted("session-1", None)]),
        store_with(Some("old-login"), None),
    );

    manager.login("anna", "hunter2").await.unwrap();

    assert_eq!(manager.store().login_token().as_deref(), Some("old-login"));
    assert_eq!(manager.session_token().as_deref(), Some("session-1"));
}

#[tokio::test]
async fn rejected_login_surfaces_message_and_restores_phase() {
    let manager = SessionManager::new(
        MockBackend::replying([Err(LoginError::Rejected("Wrong password".into()))]),
        store_with(None, None),
    );

    let err = manager.login("anna", "nope").await.unwrap_err();

    assert_eq!(err, LoginError::Rejected("Wrong password".into()));
    assert_eq!(err.to_string(), "Wrong password");
    assert_eq!(manager.phase(), SessionPhase::AnonymousNoCredential);
    assert_eq!(manager.store().login_token(), None);
    assert_eq!(manager.session_token(), None);
    assert!(!manager.state().loading);
}

#[tokio::test]
async fn rejected_login_before_startup_renewal_is_not_left_loading() {
    let manager = SessionManager::new(
        MockBackend::replying([Err(LoginError::Rejected("Wrong password".into()))]),
        store_with(Some("rt"), None),
    );
    assert_eq!(manager.phase(), SessionPhase::Renewing);

    manager.login("anna", "nope").await.unwrap_err();

    assert_eq!(manager.phase(), SessionPhase::AnonymousNoCredential);
    assert!(!manager.state().loading);
    assert_eq!(manager.store().login_token().as_deref(), Some("rt"));
    assert_eq!(manager.backend().calls(), 1);
}

#[tokio::test]
async fn expired_login_token_degrades_to_anonymous() {
    let manager = SessionManager::new(
        MockBackend::replying([Err(LoginError::Rejected("token expired".into()))]),
        store_with(Some("expired"), None),
    );

    let state = manager.start().await;

    assert!(!state.authenticated);
    assert!(!state.logged_out);
    assert!(!state.loading);
    assert_eq!(manager.phase(), SessionPhase::AnonymousNoCredential);
    assert_eq!(manager.store().login_token(), None);
}

#[tokio::test]
async fn startup_renewal_runs_once() {
    let manager = SessionManager::new(
        MockBackend::replying([granted("session-2", Some("login-2"))]),
        store_with(Some("login-1"), None),
    );

    let state = manager.start().await;
    assert!(state.authenticated);
    manager.start().await;

    assert_eq!(manager.backend().calls(), 1);
    assert_eq!(
        manager.backend().requests.lock().unwrap()[0],
        CreateSessionRequest::LoginToken {
            login_token: "login-1".into(),
        }
    );
    assert_eq!(manager.store().login_token().as_deref(), Some("login-2"));
    assert_eq!(manager.session_token().as_deref(), Some("session-2"));
}

#[tokio::test]
async fn start_without_login_token_does_nothing() {
    let manager = SessionManager::new(MockBackend::default(), store_with(None, None));
    let state = manager.start().await;
    assert_eq!(state, AuthState::default());
    assert_eq!(manager.backend().calls(), 0);
}

#[tokio::test]
async fn logout_clears_both_slots() {
    let manager = SessionManager::new(MockBackend::default(), store_with(Some("rt"), Some("st")));

    manager.logout().unwrap();

    assert_eq!(manager.store().login_token(), None);
    assert_eq!(manager.session_token(), None);
    assert_eq!(manager.phase(), SessionPhase::LoggedOut);
    assert_eq!(
        manager.state(),
        AuthState {
            authenticated: false,
            loading: false,
            logged_out: true,
        }
    );
}

#[tokio::test]
async fn renewal_resolving_after_logout_is_discarded() {
    let gate = Arc::new(Semaphore::new(0));
    let manager = Arc::new(SessionManager::new(
        MockBackend::replying([granted("resurrected", Some("rotated"))]).gated(&gate),
        store_with(Some("login-1"), None),
    ));

    let renewal = tokio::spawn({
        let manager = Arc::clone(&manager);
        async move { manager.start().await }
    });
    manager.backend().entered.notified().await;

    manager.logout().unwrap();
    gate.add_permits(1);
    let state = renewal.await.unwrap();

    assert!(!state.authenticated);
    assert!(state.logged_out);
    assert_eq!(manager.store().login_token(), None);
    assert_eq!(manager.session_token(), None);
    assert_eq!(manager.phase(), SessionPhase::LoggedOut);
}

#[tokio::test]
async fn login_resolving_after_logout_is_cancelled() {
    let gate = Arc::new(Semaphore::new(0));
    let manager = Arc::new(SessionManager::new(
        MockBackend::replying([granted("st", Some("rt"))]).gated(&gate),
        store_with(None, None),
    ));

    let login = tokio::spawn({
        let manager = Arc::clone(&manager);
        async move { manager.login("anna", "pw").await }
    });
    manager.backend().entered.notified().await;
    assert!(manager.state().loading);

    manager.logout().unwrap();
    gate.add_permits(1);

    assert_eq!(login.await.unwrap(), Err(LoginError::Cancelled));
    assert_eq!(manager.session_token(), None);
    assert_eq!(manager.store().login_token(), None);
    assert_eq!(manager.phase(), SessionPhase::LoggedOut);
}

#[tokio::test]
async fn concurrent_logins_share_one_request() {
    let gate = Arc::new(Semaphore::new(0));
    let manager = SessionManager::new(
        MockBackend::replying([granted("st", Some("rt"))]).gated(&gate),
        store_with(None, None),
    );

    let (first, second, ()) = tokio::join!(
        manager.login("anna", "pw"),
        manager.login("anna", "pw"),
        async {
            tokio::task::yield_now().await;
            gate.add_permits(1);
        }
    );

    assert_eq!(first, Ok(()));
    assert_eq!(second, Ok(()));
    assert_eq!(manager.backend().calls(), 1);
    assert_eq!(manager.session_token().as_deref(), Some("st"));
}

#[tokio::test]
async fn different_credentials_while_busy_are_refused() {
    let gate = Arc::new(Semaphore::new(0));
    let manager = SessionManager::new(
        MockBackend::replying([granted("st", None)]).gated(&gate),
        store_with(None, None),
    );

    let (first, second, ()) = tokio::join!(
        manager.login("anna", "pw"),
        manager.login("bertil", "pw"),
        async {
            tokio::task::yield_now().await;
            gate.add_permits(1);
        }
    );

    assert_eq!(first, Ok(()));
    assert_eq!(second, Err(LoginError::Busy));
    assert_eq!(manager.backend().calls(), 1);
}

#[tokio::test(start_paused = true)]
async fn abandoned_login_releases_the_exchange() {
    let gate = Arc::new(Semaphore::new(0));
    let manager = SessionManager::new(
        MockBackend::replying([
            Err(LoginError::Unavailable("never delivered".into())),
            granted("st", None),
        ])
        .gated(&gate),
        store_with(None, None),
    );

    let timed_out =
        tokio::time::timeout(Duration::from_millis(50), manager.login("anna", "pw")).await;
    assert!(timed_out.is_err());
    assert_eq!(manager.phase(), SessionPhase::AnonymousNoCredential);
    assert!(!manager.state().loading);

    // the abandoned exchange never consumed its reply
    manager.backend().replies.lock().unwrap().pop_front();
    gate.add_permits(1);
    manager.login("anna", "pw").await.unwrap();
    assert!(manager.is_authenticated());
}

#[tokio::test]
async fn rejected_session_token_is_renewed_once() {
    let manager = SessionManager::new(
        MockBackend::replying([granted("fresh", Some("login-2"))]),
        store_with(Some("login-1"), Some("stale")),
    );

    assert!(manager.invalidate_session("stale").await);
    assert_eq!(manager.session_token().as_deref(), Some("fresh"));
    assert_eq!(manager.store().login_token().as_deref(), Some("login-2"));

    // a second caller holding the old token sees the renewed session
    assert!(manager.invalidate_session("stale").await);
    assert_eq!(manager.backend().calls(), 1);
}

#[tokio::test]
async fn rejected_session_without_login_token_is_not_authenticated() {
    let manager = SessionManager::new(MockBackend::default(), store_with(None, Some("stale")));

    assert!(!manager.invalidate_session("stale").await);
    assert_eq!(manager.phase(), SessionPhase::AnonymousNoCredential);
    assert_eq!(manager.backend().calls(), 0);
}

#[tokio::test]
async fn logout_and_revoke_ends_server_session() {
    let manager = SessionManager::new(MockBackend::default(), store_with(Some("rt"), Some("st")));

    manager.logout_and_revoke().await.unwrap();

    assert_eq!(*manager.backend().revoked.lock().unwrap(), vec!["st".to_string()]);
    assert_eq!(manager.session_token(), None);
}

#[test]
fn session_request_wire_shapes() {
    let password = serde_json::to_value(CreateSessionRequest::Password {
        username: "anna".into(),
        password: "pw".into(),
    })
    .unwrap();
    assert_eq!(password, serde_json::json!({"username": "anna", "password": "pw"}));

    let token = serde_json::to_value(CreateSessionRequest::LoginToken {
        login_token: "rt".into(),
    })
    .unwrap();
    assert_eq!(token, serde_json::json!({"login_token": "rt"}));

    let response: CreateSessionResponse =
        serde_json::from_str(r#"{"session_token": "st", "refresh_token": "rt"}"#).unwrap();
    assert_eq!(response.login_token.as_deref(), Some("rt"));
    let response: CreateSessionResponse =
        serde_json::from_str(r#"{"session_token": "st", "login_token": null}"#).unwrap();
    assert_eq!(response.login_token, None);
}

#[test]
fn debug_output_hides_secrets() {
    let request = CreateSessionRequest::Password {
        username: "anna".into(),
        password: "hunter2".into(),
    };
    let printed = format!("{request:?}");
    assert!(printed.contains("anna"));
    assert!(!printed.contains("hunter2"));
}

fn http_backend(server: &MockServer) -> HttpAuthBackend {
    HttpAuthBackend::new(
        ApiClientBuilder::new(server.uri())
            .retry(RetryPolicy::new(3, Duration::from_millis(1)))
            .build()
            .unwrap(),
    )
}

#[tokio::test]
async fn http_backend_creates_session() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/auth/session"))
        .and(body_json(serde_json::json!({"username": "anna", "password": "pw"})))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "session_token": "st",
            "login_token": "rt"
        })))
        .expect(1)
        .mount(&server)
        .await;

    let response = http_backend(&server)
        .create_session(&CreateSessionRequest::Password {
            username: "anna".into(),
            password: "pw".into(),
        })
        .await
        .unwrap();

    assert_eq!(response.session_token, "st");
    assert_eq!(response.login_token.as_deref(), Some("rt"));
}

#[tokio::test]
async fn http_backend_does_not_retry_bad_request() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/auth/session"))
        .respond_with(ResponseTemplate::new(400).set_body_string("Invalid username or password"))
        .expect(1)
        .mount(&server)
        .await;

    let err = http_backend(&server)
        .create_session(&CreateSessionRequest::LoginToken {
            login_token: "rt".into(),
        })
        .await
        .unwrap_err();

    assert_eq!(err, LoginError::Rejected("Invalid username or password".into()));
}

#[tokio::test]
async fn http_backend_gives_up_after_server_errors() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/auth/session"))
        .respond_with(ResponseTemplate::new(503))
        .expect(3)
        .mount(&server)
        .await;

    let err = http_backend(&server)
        .create_session(&CreateSessionRequest::LoginToken {
            login_token: "rt".into(),
        })
        .await
        .unwrap_err();

    assert!(matches!(err, LoginError::Unavailable(_)));
}

#[tokio::test]
async fn http_backend_revokes_with_bearer_token() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/auth/logout"))
        .and(header("authorization", "Bearer st"))
        .respond_with(ResponseTemplate::new(204))
        .expect(1)
        .mount(&server)
        .await;

    http_backend(&server).end_session("st").await.unwrap();
}
