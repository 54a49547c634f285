//! Payload messages carried in frames.
//!
//! Handshake messages (`BindServiceRequest`, `BindServiceReply`,
//! `RemoteError`) plus the consumer-port query schema. All payloads are
//! MessagePack maps (see [`MsgPackCodec`](crate::codec::MsgPackCodec)).

use serde::{Deserialize, Serialize};

/// Bind request: resolve a service name to its method table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BindServiceRequest {
    pub service_name: String,
}

/// One method exposed by a bound service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteMethod {
    /// Method ID to put in invoke frame headers.
    pub id: u16,
    pub name: String,
}

/// Bind reply: the service ID and every method it exposes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BindServiceReply {
    pub service_id: u32,
    #[serde(default)]
    pub methods: Vec<RemoteMethod>,
}

/// Payload of an error reply (bind or invoke).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteError {
    pub message: String,
}

/// Request for the `QueryServiceState` method. Carries no fields.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueryServiceStateRequest {}

/// A producer connected to the tracing service.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Producer {
    pub id: i32,
    pub name: String,
    pub uid: i32,
}

/// Static description of a data source.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DataSourceDescriptor {
    pub name: String,
    pub will_notify_on_start: bool,
    pub will_notify_on_stop: bool,
    pub handles_incremental_state_clear: bool,
}

/// A data source registered by a producer.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DataSource {
    pub producer_id: i32,
    pub descriptor: DataSourceDescriptor,
}

/// One message of the `QueryServiceState` response stream.
///
/// The service may split its state across several messages; consumers
/// should merge the `producers` and `data_sources` lists they receive.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TracingServiceState {
    pub producers: Vec<Producer>,
    pub data_sources: Vec<DataSource>,
    pub num_sessions: i32,
    pub num_sessions_started: i32,
}

impl TracingServiceState {
    /// Look up a producer by ID.
    pub fn producer(&self, id: i32) -> Option<&Producer> {
        self.producers.iter().find(|p| p.id == id)
    }

    /// Merge another partial state message into this one.
    pub fn merge(&mut self, other: TracingServiceState) {
        self.producers.extend(other.producers);
        self.data_sources.extend(other.data_sources);
        self.num_sessions = self.num_sessions.max(other.num_sessions);
        self.num_sessions_started = self.num_sessions_started.max(other.num_sessions_started);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::MsgPackCodec;

    #[test]
    fn test_bind_reply_decodes_without_methods() {
        #[derive(Serialize)]
        struct Bare {
            service_id: u32,
        }

        let bytes = MsgPackCodec::encode(&Bare { service_id: 3 }).unwrap();
        let reply: BindServiceReply = MsgPackCodec::decode(&bytes).unwrap();

        assert_eq!(reply.service_id, 3);
        assert!(reply.methods.is_empty());
    }

    #[test]
    fn test_service_state_tolerates_missing_fields() {
        #[derive(Serialize)]
        struct Partial {
            num_sessions: i32,
        }

        let bytes = MsgPackCodec::encode(&Partial { num_sessions: 2 }).unwrap();
        let state: TracingServiceState = MsgPackCodec::decode(&bytes).unwrap();

        assert_eq!(state.num_sessions, 2);
        assert!(state.producers.is_empty());
    }

    #[test]
    fn test_merge_and_lookup() {
        let mut state = TracingServiceState {
            producers: vec![Producer {
                id: 1,
                name: "traced_probes".into(),
                uid: 0,
            }],
            num_sessions: 1,
            ..Default::default()
        };
        state.merge(TracingServiceState {
            data_sources: vec![DataSource {
                producer_id: 1,
                descriptor: DataSourceDescriptor {
                    name: "linux.ftrace".into(),
                    ..Default::default()
                },
            }],
            num_sessions: 3,
            ..Default::default()
        });

        assert_eq!(state.producer(1).map(|p| p.name.as_str()), Some("traced_probes"));
        assert!(state.producer(2).is_none());
        assert_eq!(state.data_sources.len(), 1);
        assert_eq!(state.num_sessions, 3);
    }
}
