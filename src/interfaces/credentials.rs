use async_trait::async_trait;

use crate::credentials::GoogleCredentials;
use crate::error::Result;

/// One source of Google OAuth credentials. `Ok(None)` means the source has
/// nothing to offer and the next provider should be asked.
#[async_trait]
pub trait CredentialProvider: Send + Sync {
    fn name(&self) -> &str;
    async fn load(&self) -> Result<Option<GoogleCredentials>>;
}
