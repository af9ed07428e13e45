//! Session lookup for the dispatching user.

use crate::domain::{WebApiError, normalize_locale};
use crate::ports::DeviceApi;
use crate::ports::device_api::response_str;

const SESSION_PATH: &str = "/session/current";

/// Display locale of `api_token`'s session, e.g. `en_US`.
pub async fn get_locale(api: &dyn DeviceApi, api_token: &str) -> Result<String, WebApiError> {
    let response = api.get(SESSION_PATH, api_token).await?;
    let display_language = response_str(&response, "display_language")?;
    Ok(normalize_locale(&display_language))
}
