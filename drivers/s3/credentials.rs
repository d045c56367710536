//! S3凭证链
//!
//! Providers are tried in order; the first one yielding real (non-anonymous)
//! credentials wins and is reused until it reports expiry. Selection:
//!
//! - `aws_sdk_auth`: the AWS SDK default chain for the configured region
//! - static `access_key`/`secret_key`
//! - otherwise environment, shared credentials file, ECS task role, then EC2
//!   instance metadata (all from `aws-config`)
//!
//! With `signature_version2` every provider is wrapped so that non-anonymous
//! credentials report signature V2.

use std::fmt;
use std::path::PathBuf;

use async_trait::async_trait;
use aws_config::ecs::EcsCredentialsProvider;
use aws_config::environment::EnvironmentVariableCredentialsProvider;
use aws_config::imds;
use aws_config::imds::credentials::ImdsCredentialsProvider;
use aws_config::profile::ProfileFileCredentialsProvider;
use aws_credential_types::provider::error::CredentialsError;
use aws_credential_types::provider::{ProvideCredentials, SharedCredentialsProvider};
use chrono::{DateTime, Utc};
use parking_lot::Mutex;

use crate::error::{Error, Result};
use super::config::S3Config;
use super::transport::TransportSettings;

/// Request signing scheme / 签名方式
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignatureVersion {
    V4,
    V2,
    /// Unsigned request
    Anonymous,
}

/// Resolved credentials / 凭证
#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    pub access_key_id: String,
    pub secret_access_key: String,
    pub session_token: Option<String>,
    pub signature: SignatureVersion,
}

impl Credentials {
    pub fn new(access_key_id: impl Into<String>, secret_access_key: impl Into<String>) -> Self {
        Self {
            access_key_id: access_key_id.into(),
            secret_access_key: secret_access_key.into(),
            session_token: None,
            signature: SignatureVersion::V4,
        }
    }

    pub fn anonymous() -> Self {
        Self {
            access_key_id: String::new(),
            secret_access_key: String::new(),
            session_token: None,
            signature: SignatureVersion::Anonymous,
        }
    }

    pub fn with_session_token(mut self, token: Option<String>) -> Self {
        self.session_token = token.filter(|t| !t.is_empty());
        self
    }

    pub fn is_anonymous(&self) -> bool {
        self.signature == SignatureVersion::Anonymous
            || (self.access_key_id.is_empty() && self.secret_access_key.is_empty())
    }

    /// Anonymous unless both halves of the key pair are present.
    fn from_pair(access_key_id: String, secret_access_key: String, token: Option<String>) -> Self {
        if access_key_id.is_empty() || secret_access_key.is_empty() {
            return Self::anonymous();
        }
        Self::new(access_key_id, secret_access_key).with_session_token(token)
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("access_key_id", &self.access_key_id)
            .field("secret_access_key", &"<redacted>")
            .field("session_token", &self.session_token.as_ref().map(|_| "<redacted>"))
            .field("signature", &self.signature)
            .finish()
    }
}

/// Credential source / 凭证提供者
#[async_trait]
pub trait CredentialProvider: Send + Sync {
    /// Short name for logs
    fn name(&self) -> &'static str;

    /// Fetch the current credentials / 获取凭证
    async fn retrieve(&self) -> Result<Credentials>;

    /// Whether the last retrieved credentials need refreshing
    fn is_expired(&self) -> bool;
}

/// Fixed key pair from config / 静态凭证
pub struct StaticProvider {
    credentials: Credentials,
}

impl StaticProvider {
    pub fn new(access_key: &str, secret_key: &str) -> Self {
        Self {
            credentials: Credentials::from_pair(access_key.to_string(), secret_key.to_string(), None),
        }
    }
}

#[async_trait]
impl CredentialProvider for StaticProvider {
    fn name(&self) -> &'static str {
        "static"
    }

    async fn retrieve(&self) -> Result<Credentials> {
        Ok(self.credentials.clone())
    }

    fn is_expired(&self) -> bool {
        false
    }
}

/// Refresh once 80% of the remaining lifetime has passed.
fn refresh_deadline(now: DateTime<Utc>, expiration: DateTime<Utc>) -> DateTime<Utc> {
    let remaining = expiration - now;
    if remaining <= chrono::Duration::zero() {
        return now;
    }
    now + remaining * 4 / 5
}

/// Expiry bookkeeping shared by the refreshable providers.
#[derive(Default)]
struct ExpiryState {
    retrieved: bool,
    refresh_at: Option<DateTime<Utc>>,
}

impl ExpiryState {
    fn mark(&mut self, expiration: Option<DateTime<Utc>>) {
        self.retrieved = true;
        self.refresh_at = expiration.map(|exp| refresh_deadline(Utc::now(), exp));
    }

    fn is_expired(&self) -> bool {
        if !self.retrieved {
            return true;
        }
        match self.refresh_at {
            Some(at) => Utc::now() >= at,
            None => false,
        }
    }
}

/// Adapter over an `aws-config` credential provider / AWS 凭证提供者适配
///
/// A provider with nothing to offer (`CredentialsNotLoaded`) yields anonymous
/// credentials so the chain moves on without logging a failure.
pub struct SdkProvider {
    name: &'static str,
    inner: SharedCredentialsProvider,
    state: Mutex<ExpiryState>,
}

impl SdkProvider {
    pub fn new(name: &'static str, inner: impl ProvideCredentials + 'static) -> Self {
        Self {
            name,
            inner: SharedCredentialsProvider::new(inner),
            state: Mutex::new(ExpiryState::default()),
        }
    }

    /// AWS_ACCESS_KEY_ID / AWS_SECRET_ACCESS_KEY / AWS_SESSION_TOKEN
    pub fn env() -> Self {
        Self::new("env", EnvironmentVariableCredentialsProvider::new())
    }

    /// Shared credentials and config files. `None` follows
    /// AWS_SHARED_CREDENTIALS_FILE / AWS_CONFIG_FILE / AWS_PROFILE and then
    /// `~/.aws/credentials` / `default`.
    #[allow(deprecated)]
    pub fn profile(path: Option<PathBuf>, profile: Option<String>) -> Self {
        use aws_config::profile::profile_file::{ProfileFileKind, ProfileFiles};

        let mut builder = ProfileFileCredentialsProvider::builder();
        if let Some(path) = path {
            builder = builder.profile_files(
                ProfileFiles::builder()
                    .with_file(ProfileFileKind::Credentials, path)
                    .build(),
            );
        }
        if let Some(profile) = profile {
            builder = builder.profile_name(profile);
        }
        Self::new("file", builder.build())
    }

    /// ECS task role; only active when the container credential variables are set
    pub fn ecs() -> Self {
        Self::new("ecs", EcsCredentialsProvider::builder().build())
    }

    /// EC2 instance role over IMDSv2. An empty endpoint uses the default
    /// metadata address (or AWS_EC2_METADATA_SERVICE_ENDPOINT).
    pub fn imds(endpoint: &str, transport: &TransportSettings) -> Result<Self> {
        let mut client = imds::Client::builder()
            .connect_timeout(transport.tls_handshake_timeout)
            .read_timeout(transport.response_header_timeout);
        if !endpoint.is_empty() {
            client = client
                .endpoint(endpoint)
                .map_err(|e| Error::Config(format!("invalid sts_endpoint {:?}: {}", endpoint, e)))?;
        }
        let provider = ImdsCredentialsProvider::builder()
            .imds_client(client.build())
            .build();
        Ok(Self::new("imds", provider))
    }
}

#[async_trait]
impl CredentialProvider for SdkProvider {
    fn name(&self) -> &'static str {
        self.name
    }

    async fn retrieve(&self) -> Result<Credentials> {
        match self.inner.provide_credentials().await {
            Ok(creds) => {
                self.state.lock().mark(creds.expiry().map(DateTime::<Utc>::from));
                Ok(Credentials::from_pair(
                    creds.access_key_id().to_string(),
                    creds.secret_access_key().to_string(),
                    creds.session_token().map(str::to_string),
                ))
            }
            Err(CredentialsError::CredentialsNotLoaded(e)) => {
                tracing::debug!("Credential provider {} has nothing to offer: {:?}", self.name, e);
                self.state.lock().mark(None);
                Ok(Credentials::anonymous())
            }
            Err(e) => Err(Error::Credential(format!("{} credentials: {}", self.name, e))),
        }
    }

    fn is_expired(&self) -> bool {
        self.state.lock().is_expired()
    }
}

/// AWS SDK default credential chain / AWS SDK 默认凭证链
pub struct AwsSdkProvider {
    region: String,
    state: Mutex<ExpiryState>,
}

impl AwsSdkProvider {
    pub fn new(region: &str) -> Self {
        Self {
            region: region.to_string(),
            state: Mutex::new(ExpiryState::default()),
        }
    }
}

#[async_trait]
impl CredentialProvider for AwsSdkProvider {
    fn name(&self) -> &'static str {
        "aws-sdk"
    }

    async fn retrieve(&self) -> Result<Credentials> {
        let mut builder = aws_config::default_provider::credentials::DefaultCredentialsChain::builder();
        if !self.region.is_empty() {
            builder = builder.region(aws_config::Region::new(self.region.clone()));
        }
        let chain = builder.build().await;
        let creds = chain
            .provide_credentials()
            .await
            .map_err(|e| Error::Credential(format!("retrieve AWS SDK credentials: {}", e)))?;

        self.state
            .lock()
            .mark(creds.expiry().map(DateTime::<Utc>::from));
        Ok(Credentials::new(creds.access_key_id(), creds.secret_access_key())
            .with_session_token(creds.session_token().map(str::to_string)))
    }

    fn is_expired(&self) -> bool {
        self.state.lock().is_expired()
    }
}

/// Forces a signature version onto non-anonymous credentials / 签名覆盖
pub struct SignatureOverride {
    inner: Box<dyn CredentialProvider>,
    signature: SignatureVersion,
}

impl SignatureOverride {
    pub fn new(inner: Box<dyn CredentialProvider>, signature: SignatureVersion) -> Self {
        Self { inner, signature }
    }
}

#[async_trait]
impl CredentialProvider for SignatureOverride {
    fn name(&self) -> &'static str {
        self.inner.name()
    }

    async fn retrieve(&self) -> Result<Credentials> {
        let mut creds = self.inner.retrieve().await?;
        if !creds.is_anonymous() {
            creds.signature = self.signature;
        }
        Ok(creds)
    }

    fn is_expired(&self) -> bool {
        self.inner.is_expired()
    }
}

struct Cached {
    provider: usize,
    credentials: Credentials,
}

/// Ordered provider list; first real credentials win / 凭证链
pub struct CredentialChain {
    providers: Vec<Box<dyn CredentialProvider>>,
    current: tokio::sync::Mutex<Option<Cached>>,
}

impl CredentialChain {
    pub fn new(providers: Vec<Box<dyn CredentialProvider>>) -> Self {
        Self {
            providers,
            current: tokio::sync::Mutex::new(None),
        }
    }

    /// Build the chain for a validated config / 根据配置构建凭证链
    pub fn from_config(config: &S3Config, transport: &TransportSettings) -> Result<Self> {
        let mut providers: Vec<Box<dyn CredentialProvider>> = if config.aws_sdk_auth {
            vec![Box::new(AwsSdkProvider::new(&config.region))]
        } else if !config.access_key.is_empty() {
            vec![Box::new(StaticProvider::new(&config.access_key, &config.secret_key))]
        } else {
            vec![
                Box::new(SdkProvider::env()),
                Box::new(SdkProvider::profile(None, None)),
                Box::new(SdkProvider::ecs()),
                Box::new(SdkProvider::imds(&config.sts_endpoint, transport)?),
            ]
        };

        if config.signature_v2 {
            providers = providers
                .into_iter()
                .map(|p| Box::new(SignatureOverride::new(p, SignatureVersion::V2)) as Box<dyn CredentialProvider>)
                .collect();
        }

        tracing::debug!(
            "Credential chain: [{}]",
            providers.iter().map(|p| p.name()).collect::<Vec<_>>().join(", ")
        );
        Ok(Self::new(providers))
    }

    pub fn provider_names(&self) -> Vec<&'static str> {
        self.providers.iter().map(|p| p.name()).collect()
    }

    /// Current credentials, refreshed when the winning provider expires / 获取当前凭证
    pub async fn credentials(&self) -> Result<Credentials> {
        let mut current = self.current.lock().await;
        if let Some(cached) = current.as_ref() {
            if !self.providers[cached.provider].is_expired() {
                return Ok(cached.credentials.clone());
            }
        }

        let mut saw_anonymous = false;
        let mut last_error = None;
        for (index, provider) in self.providers.iter().enumerate() {
            match provider.retrieve().await {
                Ok(creds) if creds.is_anonymous() => {
                    saw_anonymous = true;
                }
                Ok(creds) => {
                    tracing::debug!("Credentials resolved by provider {}", provider.name());
                    *current = Some(Cached {
                        provider: index,
                        credentials: creds.clone(),
                    });
                    return Ok(creds);
                }
                Err(e) => {
                    tracing::warn!("Credential provider {} failed: {}", provider.name(), e);
                    last_error = Some(e);
                }
            }
        }

        *current = None;
        match last_error {
            Some(e) if !saw_anonymous => Err(e),
            _ => Ok(Credentials::anonymous()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::time::{Duration, SystemTime};

    use aws_credential_types::provider::future;

    /// Scripted provider counting its retrievals.
    struct Scripted {
        result: std::result::Result<Credentials, String>,
        expired: Arc<AtomicBool>,
        calls: Arc<AtomicUsize>,
    }

    impl Scripted {
        fn ok(creds: Credentials) -> Self {
            Self {
                result: Ok(creds),
                expired: Arc::new(AtomicBool::new(false)),
                calls: Arc::new(AtomicUsize::new(0)),
            }
        }

        fn err(msg: &str) -> Self {
            Self {
                result: Err(msg.to_string()),
                expired: Arc::new(AtomicBool::new(false)),
                calls: Arc::new(AtomicUsize::new(0)),
            }
        }
    }

    #[async_trait]
    impl CredentialProvider for Scripted {
        fn name(&self) -> &'static str {
            "scripted"
        }

        async fn retrieve(&self) -> Result<Credentials> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.result.clone().map_err(Error::Credential)
        }

        fn is_expired(&self) -> bool {
            self.expired.load(Ordering::SeqCst)
        }
    }

    fn base_config() -> S3Config {
        S3Config {
            endpoint: "s3.example.com".into(),
            bucket: "b".into(),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_chain_selection() {
        let transport = TransportSettings::default();

        let sdk = S3Config { aws_sdk_auth: true, region: "eu-west-1".into(), ..base_config() };
        assert_eq!(CredentialChain::from_config(&sdk, &transport).unwrap().provider_names(), vec!["aws-sdk"]);

        let fixed = S3Config { access_key: "AKIA".into(), secret_key: "x".into(), ..base_config() };
        assert_eq!(CredentialChain::from_config(&fixed, &transport).unwrap().provider_names(), vec!["static"]);

        let ambient = base_config();
        assert_eq!(
            CredentialChain::from_config(&ambient, &transport).unwrap().provider_names(),
            vec!["env", "file", "ecs", "imds"]
        );

        let custom = S3Config { sts_endpoint: "http://metadata.local:8080".into(), ..base_config() };
        assert!(CredentialChain::from_config(&custom, &transport).is_ok());

        let broken = S3Config { sts_endpoint: "http://[::1".into(), ..base_config() };
        assert!(matches!(CredentialChain::from_config(&broken, &transport), Err(Error::Config(_))));
    }

    #[tokio::test]
    async fn test_static_provider() {
        let creds = StaticProvider::new("AKIA", "secret").retrieve().await.unwrap();
        assert_eq!(creds.access_key_id, "AKIA");
        assert_eq!(creds.secret_access_key, "secret");
        assert_eq!(creds.signature, SignatureVersion::V4);
    }

    #[tokio::test]
    async fn test_signature_override_with_static_config() {
        let config = S3Config {
            access_key: "AKIA".into(),
            secret_key: "x".into(),
            signature_v2: true,
            ..base_config()
        };
        let chain = CredentialChain::from_config(&config, &TransportSettings::default()).unwrap();
        let creds = chain.credentials().await.unwrap();
        assert_eq!(creds.signature, SignatureVersion::V2);
        assert_eq!(creds.access_key_id, "AKIA");
    }

    #[tokio::test]
    async fn test_signature_override_skips_anonymous() {
        let wrapped = SignatureOverride::new(
            Box::new(Scripted::ok(Credentials::anonymous())),
            SignatureVersion::V2,
        );
        assert_eq!(wrapped.retrieve().await.unwrap().signature, SignatureVersion::Anonymous);

        let wrapped = SignatureOverride::new(
            Box::new(Scripted::ok(Credentials::new("a", "b"))),
            SignatureVersion::V2,
        );
        assert_eq!(wrapped.retrieve().await.unwrap().signature, SignatureVersion::V2);
    }

    /// aws-config provider that has nothing to offer.
    #[derive(Debug)]
    struct NotLoaded;

    impl ProvideCredentials for NotLoaded {
        fn provide_credentials<'a>(&'a self) -> future::ProvideCredentials<'a>
        where
            Self: 'a,
        {
            future::ProvideCredentials::ready(Err(CredentialsError::not_loaded("no variables set")))
        }
    }

    /// aws-config provider failing outright.
    #[derive(Debug)]
    struct Broken;

    impl ProvideCredentials for Broken {
        fn provide_credentials<'a>(&'a self) -> future::ProvideCredentials<'a>
        where
            Self: 'a,
        {
            future::ProvideCredentials::ready(Err(CredentialsError::provider_error("metadata returned 500")))
        }
    }

    #[tokio::test]
    async fn test_sdk_provider_maps_credentials() {
        let expiry = SystemTime::now() + Duration::from_secs(3600);
        let sdk = aws_credential_types::Credentials::new("ASIA", "secret", Some("token".into()), Some(expiry), "test");
        let provider = SdkProvider::new("imds", sdk);
        assert_eq!(provider.name(), "imds");
        assert!(provider.is_expired());

        let creds = provider.retrieve().await.unwrap();
        assert_eq!(creds.access_key_id, "ASIA");
        assert_eq!(creds.secret_access_key, "secret");
        assert_eq!(creds.session_token.as_deref(), Some("token"));
        assert_eq!(creds.signature, SignatureVersion::V4);
        assert!(!provider.is_expired());

        // already past its refresh point
        let stale = aws_credential_types::Credentials::new("ASIA", "secret", None, Some(SystemTime::now()), "test");
        let provider = SdkProvider::new("ecs", stale);
        provider.retrieve().await.unwrap();
        assert!(provider.is_expired());
    }

    #[tokio::test]
    async fn test_sdk_provider_not_loaded_is_anonymous() {
        let provider = SdkProvider::new("env", NotLoaded);
        assert!(provider.retrieve().await.unwrap().is_anonymous());
        assert!(!provider.is_expired());

        let provider = SdkProvider::new("imds", Broken);
        match provider.retrieve().await {
            Err(Error::Credential(msg)) => assert!(msg.starts_with("imds credentials"), "{}", msg),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_profile_provider() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            "# comment\n[default]\naws_access_key_id = AKIADEFAULT\naws_secret_access_key = s1\n\n\
             [costs]\naws_access_key_id=AKIACOSTS\naws_secret_access_key=s2\naws_session_token=t2\n"
        )
        .unwrap();

        let provider = SdkProvider::profile(Some(file.path().to_path_buf()), Some("default".into()));
        let creds = provider.retrieve().await.unwrap();
        assert_eq!(creds.access_key_id, "AKIADEFAULT");
        assert_eq!(creds.session_token, None);

        let provider = SdkProvider::profile(Some(file.path().to_path_buf()), Some("costs".into()));
        let creds = provider.retrieve().await.unwrap();
        assert_eq!(creds.access_key_id, "AKIACOSTS");
        assert_eq!(creds.session_token.as_deref(), Some("t2"));

        let missing = SdkProvider::profile(Some(file.path().to_path_buf()), Some("nope".into()));
        assert!(missing.retrieve().await.unwrap().is_anonymous());

        let absent = SdkProvider::profile(Some("/nonexistent/credentials".into()), Some("default".into()));
        assert!(absent.retrieve().await.unwrap().is_anonymous());
    }

    #[tokio::test]
    async fn test_chain_first_real_credentials_win() {
        let first = Scripted::err("no file");
        let second = Scripted::ok(Credentials::anonymous());
        let third = Scripted::ok(Credentials::new("AKIA3", "s3"));
        let fourth = Scripted::ok(Credentials::new("AKIA4", "s4"));
        let fourth_calls = fourth.calls.clone();

        let chain = CredentialChain::new(vec![
            Box::new(first),
            Box::new(second),
            Box::new(third),
            Box::new(fourth),
        ]);
        assert_eq!(chain.credentials().await.unwrap().access_key_id, "AKIA3");
        assert_eq!(fourth_calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_chain_caches_until_expired() {
        let provider = Scripted::ok(Credentials::new("AKIA", "s"));
        let calls = provider.calls.clone();
        let expired = provider.expired.clone();
        let chain = CredentialChain::new(vec![Box::new(provider)]);

        chain.credentials().await.unwrap();
        chain.credentials().await.unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        expired.store(true, Ordering::SeqCst);
        chain.credentials().await.unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_chain_all_failed() {
        let chain = CredentialChain::new(vec![Box::new(Scripted::err("a")), Box::new(Scripted::err("b"))]);
        match chain.credentials().await {
            Err(Error::Credential(msg)) => assert_eq!(msg, "b"),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_chain_falls_back_to_anonymous() {
        let chain = CredentialChain::new(vec![
            Box::new(Scripted::err("no file")),
            Box::new(Scripted::ok(Credentials::anonymous())),
        ]);
        assert!(chain.credentials().await.unwrap().is_anonymous());
    }

    #[test]
    fn test_refresh_deadline() {
        let now = Utc::now();
        let exp = now + chrono::Duration::seconds(100);
        assert_eq!(refresh_deadline(now, exp), now + chrono::Duration::seconds(80));
        assert_eq!(refresh_deadline(now, now - chrono::Duration::seconds(5)), now);

        let mut state = ExpiryState::default();
        assert!(state.is_expired());
        state.mark(None);
        assert!(!state.is_expired());
        state.mark(Some(Utc::now() - chrono::Duration::seconds(1)));
        assert!(state.is_expired());
        state.mark(Some(Utc::now() + chrono::Duration::hours(1)));
        assert!(!state.is_expired());
    }
}
