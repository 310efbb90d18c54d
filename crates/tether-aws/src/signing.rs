//! Presigned broker URLs
//!
//! The broker accepts MQTT over a WebSocket whose URL carries a SigV4 query
//! signature. The session token is not part of the signed request; it is
//! appended to the signed URL as `X-Amz-Security-Token`.

use aws_credential_types::Credentials as SigningCredentials;
use aws_sigv4::http_request::{
    sign, SignableBody, SignableRequest, SignatureLocation, SigningSettings,
};
use aws_sigv4::sign::v4;
use percent_encoding::{utf8_percent_encode, AsciiSet, NON_ALPHANUMERIC};
use std::time::{Duration, SystemTime};
use tether_transport::{Credentials, TransportError};

/// Signing name of the broker's data plane
pub const SIGNING_NAME: &str = "iotdevicegateway";

/// Query encoding: everything but the unreserved characters
const QUERY_VALUE: &AsciiSet = &NON_ALPHANUMERIC.remove(b'-').remove(b'_').remove(b'.').remove(b'~');

fn encode(value: &str) -> String {
    utf8_percent_encode(value, QUERY_VALUE).to_string()
}

fn signing_failed(e: impl std::fmt::Display) -> TransportError {
    TransportError::Credentials(format!("signing failed: {e}"))
}

/// `wss://` URL for `endpoint`, signed for `region` at `time`
///
/// # Errors
/// - `TransportError::Credentials` if the request cannot be signed
pub fn presigned_url(
    endpoint: &str,
    region: &str,
    credentials: &Credentials,
    time: SystemTime,
    expires_in: Duration,
) -> Result<String, TransportError> {
    let url = format!("wss://{endpoint}/mqtt");

    let identity = SigningCredentials::new(
        credentials.access_key_id.clone(),
        credentials.secret_access_key.clone(),
        None,
        None,
        "tether",
    )
    .into();

    let mut settings = SigningSettings::default();
    settings.signature_location = SignatureLocation::QueryParams;
    settings.expires_in = Some(expires_in);

    let params = v4::SigningParams::builder()
        .identity(&identity)
        .region(region)
        .name(SIGNING_NAME)
        .time(time)
        .settings(settings)
        .build()
        .map_err(signing_failed)?
        .into();

    let request = SignableRequest::new(
        "GET",
        url.as_str(),
        std::iter::empty::<(&str, &str)>(),
        SignableBody::Bytes(&[]),
    )
    .map_err(signing_failed)?;
    let (instructions, _signature) = sign(request, &params).map_err(signing_failed)?.into_parts();
    let (_headers, query) = instructions.into_parts();

    let mut pairs: Vec<String> = query
        .iter()
        .map(|(name, value)| format!("{name}={}", encode(value)))
        .collect();
    if let Some(token) = &credentials.session_token {
        pairs.push(format!("X-Amz-Security-Token={}", encode(token)));
    }
    Ok(format!("{url}?{}", pairs.join("&")))
}
