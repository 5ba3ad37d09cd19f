//! TypedJob trait - binds an entrypoint name to a payload type

use serde::Serialize;
use serde::de::DeserializeOwned;

/// A job payload with a fixed entrypoint.
///
/// ```ignore
/// #[derive(Serialize, Deserialize)]
/// struct SendEmail {
///     to: String,
/// }
///
/// impl TypedJob for SendEmail {
///     const ENTRYPOINT: &'static str = "email.send";
/// }
/// ```
///
/// Payloads travel as JSON bytes, so producers can enqueue with
/// `serde_json::to_vec(&task)` and the same type decodes on the worker.
pub trait TypedJob: Serialize + DeserializeOwned + Send + 'static {
    const ENTRYPOINT: &'static str;
}
