use serde::{Deserialize, Serialize};

use crate::error::Error;

/// The outcome of a single lookup, as seen by the RPC layer.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum Response {
    /// The key was found; the value bytes are copied out of the worker's
    /// scratch buffer before the worker moves on.
    Value(Vec<u8>),
    /// The key is not present in its partition.
    NotFound,
    /// No domain is bound at the requested id.
    NoSuchDomain,
    /// The wait for the read was severed; the read itself still ran.
    Interrupted,
    /// Reader IO faults, unavailable partitions, caught panics, and any
    /// other failure the caller cannot act on.
    InternalError(String),
}

/// The outcome of a bulk lookup. `Responses` holds one entry per requested
/// key, in request order.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum BulkResponse {
    Responses(Vec<Response>),
    NoSuchDomain,
    Interrupted,
    InternalError(String),
}

impl From<Error> for Response {
    fn from(error: Error) -> Self {
        match error {
            Error::Interrupted => Response::Interrupted,
            other => Response::InternalError(other.to_string()),
        }
    }
}

impl From<Error> for BulkResponse {
    fn from(error: Error) -> Self {
        match error {
            Error::Interrupted => BulkResponse::Interrupted,
            other => BulkResponse::InternalError(other.to_string()),
        }
    }
}
