use std::sync::Arc;
use std::time::Duration;

use greeter_core::config::{AppConfig, ConfigError, LoadOptions};
use greeter_core::ItemStore;
use greeter_slack::{
    dedup::{DedupPolicy, EventDeduplicator},
    dispatch::{DispatchWorkers, ReplyDispatcher},
    events::greeting_router,
    intake::{EventIntake, IntakeSettings},
    signature::SignatureVerifier,
    web_api::{BotIdentity, HttpSlackWebApi, SlackWebApi, WebApiError},
};
use thiserror::Error;
use tracing::info;

use crate::{AppState, RESERVED_PATHS};

pub struct Application {
    pub config: AppConfig,
    pub state: AppState,
    pub workers: DispatchWorkers,
}

#[derive(Debug, Error)]
pub enum BootstrapError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("slack web api client could not be built: {0}")]
    SlackClient(#[source] WebApiError),
    #[error("slack bot token verification failed: {0}")]
    TokenVerification(#[source] WebApiError),
    #[error("server.events_path `{0}` collides with a built-in route")]
    EventsPathConflict(String),
}

pub async fn bootstrap(options: LoadOptions) -> Result<Application, BootstrapError> {
    let config = AppConfig::load(options)?;
    bootstrap_with_config(config).await
}

pub async fn bootstrap_with_config(config: AppConfig) -> Result<Application, BootstrapError> {
    let api = HttpSlackWebApi::new(
        config.slack.api_base_url.clone(),
        config.slack.bot_token.clone(),
        Duration::from_secs(config.slack.request_timeout_secs),
    )
    .map_err(BootstrapError::SlackClient)?;

    bootstrap_with_api(config, Arc::new(api)).await
}

/// Wires the application around an already-built Slack client. Must run inside
/// a tokio runtime because the reply workers are spawned here.
pub async fn bootstrap_with_api(
    config: AppConfig,
    api: Arc<dyn SlackWebApi>,
) -> Result<Application, BootstrapError> {
    info!(
        event_name = "system.bootstrap.start",
        correlation_id = "bootstrap",
        "starting application bootstrap"
    );

    if RESERVED_PATHS.contains(&config.server.events_path.as_str()) {
        return Err(BootstrapError::EventsPathConflict(config.server.events_path));
    }

    let identity = resolve_identity(&config, api.as_ref()).await?;

    let (dispatcher, workers) = ReplyDispatcher::spawn(api, config.events.dispatch_workers);
    info!(
        event_name = "system.bootstrap.dispatcher_started",
        correlation_id = "bootstrap",
        workers = workers.len(),
        "reply dispatcher started"
    );

    let deduplicator = Arc::new(EventDeduplicator::new(DedupPolicy::from(&config.events)));
    let intake = EventIntake::new(deduplicator, greeting_router(&config.reply.text), dispatcher)
        .with_identity(identity)
        .with_settings(IntakeSettings {
            ignore_bot_messages: config.slack.ignore_bot_messages,
            reply_in_thread: config.reply.in_thread,
        });

    let verifier = config.slack.signing_secret.clone().map(|secret| {
        SignatureVerifier::new(secret, Duration::from_secs(config.events.signature_tolerance_secs))
    });
    if verifier.is_none() {
        info!(
            event_name = "system.bootstrap.signature_disabled",
            correlation_id = "bootstrap",
            "no signing secret configured; webhook requests are not signature-checked"
        );
    }

    let state = AppState::new(intake, verifier, ItemStore::with_samples());
    Ok(Application { config, state, workers })
}

async fn resolve_identity(
    config: &AppConfig,
    api: &dyn SlackWebApi,
) -> Result<BotIdentity, BootstrapError> {
    let mut identity = if config.slack.verify_token_on_startup {
        let identity = api.auth_test().await.map_err(BootstrapError::TokenVerification)?;
        info!(
            event_name = "system.bootstrap.token_verified",
            correlation_id = "bootstrap",
            bot_user_id = identity.user_id.as_deref().unwrap_or("unknown"),
            bot_id = identity.bot_id.as_deref().unwrap_or("unknown"),
            team = identity.team.as_deref().unwrap_or("unknown"),
            "slack bot token verified"
        );
        identity
    } else {
        BotIdentity::default()
    };

    if let Some(bot_user_id) = &config.slack.bot_user_id {
        identity.user_id = Some(bot_user_id.clone());
    }
    Ok(identity)
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use async_trait::async_trait;
    use greeter_core::config::{AppConfig, ConfigOverrides, LoadOptions};
    use greeter_slack::web_api::{
        BotIdentity, NoopSlackWebApi, OutgoingMessage, PostedMessage, SlackWebApi, WebApiError,
    };

    use super::{bootstrap, bootstrap_with_api, BootstrapError};

    struct RejectingApi;

    #[async_trait]
    impl SlackWebApi for RejectingApi {
        async fn auth_test(&self) -> Result<BotIdentity, WebApiError> {
            Err(WebApiError::Api { method: "auth.test", error: "invalid_auth".to_owned() })
        }

        async fn post_message(
            &self,
            _message: &OutgoingMessage,
        ) -> Result<PostedMessage, WebApiError> {
            Ok(PostedMessage::default())
        }
    }

    struct KnownBotApi;

    #[async_trait]
    impl SlackWebApi for KnownBotApi {
        async fn auth_test(&self) -> Result<BotIdentity, WebApiError> {
            Ok(BotIdentity {
                user_id: Some("UFROMAUTH".to_owned()),
                bot_id: Some("BFROMAUTH".to_owned()),
                team: Some("Acme".to_owned()),
            })
        }

        async fn post_message(
            &self,
            _message: &OutgoingMessage,
        ) -> Result<PostedMessage, WebApiError> {
            Ok(PostedMessage::default())
        }
    }

    fn config() -> AppConfig {
        let mut config = AppConfig::default();
        config.slack.bot_token = "xoxb-test".to_owned().into();
        config
    }

    #[tokio::test]
    async fn bootstrap_fails_fast_with_wrong_token_kind() {
        let result = bootstrap(LoadOptions {
            config_path: Some("does-not-exist/greeter.toml".into()),
            overrides: ConfigOverrides {
                slack_bot_token: Some("xapp-not-a-bot-token".to_owned()),
                ..ConfigOverrides::default()
            },
            ..LoadOptions::default()
        })
        .await;

        let message = result.err().expect("bootstrap should fail").to_string();
        assert!(message.contains("slack.bot_token"), "unexpected error: {message}");
    }

    #[tokio::test]
    async fn rejected_token_aborts_bootstrap() {
        let result = bootstrap_with_api(config(), Arc::new(RejectingApi)).await;

        assert!(matches!(result, Err(BootstrapError::TokenVerification(_))));
    }

    #[tokio::test]
    async fn identity_comes_from_auth_test_with_configured_user_id_winning() {
        let mut config = config();
        config.slack.bot_user_id = Some("UCONFIGURED".to_owned());

        let app = bootstrap_with_api(config, Arc::new(KnownBotApi)).await.expect("bootstrap");
        let identity = app.state.intake.identity();

        assert_eq!(identity.user_id.as_deref(), Some("UCONFIGURED"));
        assert_eq!(identity.bot_id.as_deref(), Some("BFROMAUTH"));
        assert_eq!(app.workers.len(), 4);
    }

    #[tokio::test]
    async fn token_check_can_be_skipped() {
        let mut config = config();
        config.slack.verify_token_on_startup = false;

        let app = bootstrap_with_api(config, Arc::new(RejectingApi)).await.expect("bootstrap");

        assert_eq!(app.state.intake.identity(), &BotIdentity::default());
        assert!(app.state.verifier.is_none());
    }

    #[tokio::test]
    async fn signing_secret_enables_verification() {
        let mut config = config();
        config.slack.signing_secret = Some("secret".to_owned().into());

        let app = bootstrap_with_api(config, Arc::new(NoopSlackWebApi)).await.expect("bootstrap");

        assert!(app.state.verifier.is_some());
    }

    #[tokio::test]
    async fn events_path_may_not_shadow_builtin_routes() {
        let mut config = config();
        config.server.events_path = "/health".to_owned();

        let result = bootstrap_with_api(config, Arc::new(NoopSlackWebApi)).await;

        assert!(matches!(result, Err(BootstrapError::EventsPathConflict(path)) if path == "/health"));
    }
}
