//! Session-scoped control requests
//!
//! Control commands (add/delete/destroy) travel over plain form-encoded
//! POSTs, out of band from the stream connection. The first line of the
//! response body is the whole answer; the success marker means accepted,
//! anything else is returned as-is for the caller to interpret.

use reqwest::Client;
use tracing::debug;
use url::Url;

use pushline_core::protocol::CONTROL_PATH;

use crate::error::{PushClientError, Result};

/// Send one control request bound to the given session.
///
/// The session id is merged into `params`; only non-empty values are
/// submitted. Returns the first response line, trimmed of terminators.
pub(crate) async fn send_control(
    http: &Client,
    control_url: &Url,
    session_id: &str,
    params: Vec<(&'static str, String)>,
) -> Result<String> {
    let url = control_url.join(CONTROL_PATH)?;

    let mut form: Vec<(&str, String)> = Vec::with_capacity(params.len() + 1);
    form.push(("session", session_id.to_string()));
    form.extend(params);
    form.retain(|(_, value)| !value.is_empty());

    debug!("Control request to <{}>: {:?}", url, form);
    let response = http
        .post(url)
        .form(&form)
        .send()
        .await
        .map_err(PushClientError::ControlRequest)?;

    let status = response.status();
    if !status.is_success() {
        return Err(PushClientError::ControlStatus(status.as_u16()));
    }

    let body = response
        .text()
        .await
        .map_err(PushClientError::ControlRequest)?;
    let first = body.lines().next().unwrap_or_default().to_string();
    debug!("Control response: <{}>", first);
    Ok(first)
}
