// Metadata service client
//
// `GET https://{server}{template}` where the template carries
// `{organizationId}`, `{deviceEnumId}` and `{language}` placeholders.
// The service answers with a document holding a `datapoints` array, or
// with `{"error": "Device not found"}` for models it does not know.

pub mod client;
pub mod models;

pub use client::MetadataClient;
pub use models::{MetadataDocument, MetadataResponse, RawDatapoint, is_not_found_body};

/// Default metadata service host.
pub const DEFAULT_API_SERVER: &str = "connect.sorel.de";

/// Default endpoint template appended to `https://{server}`.
pub const DEFAULT_URL_TEMPLATE: &str =
    "/api/public/{organizationId}/device/{deviceEnumId}/metadata?language={language}";

/// Error string the service returns for unknown device models.
pub const NOT_FOUND_ERROR: &str = "Device not found";
