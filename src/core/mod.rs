//! Shared data model: worker identity, capacity, and request/decision types.

pub mod worker;

pub use worker::{DynamicInfo, GroupId, StaticInfo, WorkerId, WorkerRole};

use serde::{Deserialize, Serialize};

/// Which deployment topology a [`RoutingPolicy`](crate::policies::RoutingPolicy) is picking for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeployMode {
    SingleNode,
    PdDisaggregated,
}

/// How a request's `body` should be interpreted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RequestType {
    OpenAi,
    Raw,
    Tokens,
}

/// A single inference request as submitted to the scheduler.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Request {
    pub id: String,
    #[serde(rename = "type")]
    pub request_type: RequestType,
    pub body: RequestBody,
}

/// `body` is an opaque string for all types except `Tokens`, where it is an
/// ordered sequence of token ids.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RequestBody {
    Text(String),
    Tokens(Vec<u32>),
}

impl RequestBody {
    pub fn as_text(&self) -> Option<&str> {
        match self {
            RequestBody::Text(s) => Some(s),
            RequestBody::Tokens(_) => None,
        }
    }
}

/// The outcome of a routing policy's `Pick`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RoutingDecision {
    Single(WorkerId),
    Pair(WorkerId, WorkerId),
}
