/// Master <-> worker protocol.
///
/// Control messages are plain JSON; data messages use the mixed jsonnpy
/// envelope. The two are distinguished by the first payload byte: a JSON
/// object starts with `{`, an envelope with an ASCII digit.

use crate::error::{EngineError, Result};
use crate::execution::{MapOut, Progress, QueryPlan, SharedValues};
use crate::network::jsonnpy;
use serde::{Deserialize, Serialize};

/// Compiled sub-job shipped to one worker.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerRequest {
    /// Keys the worker-side compiled-plan cache.
    pub request_id: String,
    pub plan: QueryPlan,
    pub shared: SharedValues,
    /// User override for the shard chunk size.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub chunksize: Option<usize>,
}

/// JSON control frames sent by the master after the request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ControlFrame {
    /// Cooperative cancellation of the in-flight request.
    Interrupt,
}

/// Frames sent by the worker while serving a request.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum WorkerFrame {
    Progress { progress: Progress },
    /// Reduced accumulator; `None` when this worker held no shards.
    Result { value: Option<MapOut> },
    /// Query-caused failure; the reason is surfaced to the client verbatim.
    UserError { reason: String },
    /// Unexpected worker-side failure.
    Error { reason: String },
}

/// Either kind of master-sent frame, as seen by the worker.
#[derive(Debug)]
pub enum MasterFrame {
    Request(Box<WorkerRequest>),
    Control(ControlFrame),
}

pub fn encode_request(req: &WorkerRequest) -> Result<Vec<u8>> {
    jsonnpy::dumps(req)
}

pub fn encode_control(frame: &ControlFrame) -> Result<Vec<u8>> {
    Ok(serde_json::to_vec(frame)?)
}

pub fn decode_master_frame(payload: &[u8]) -> Result<MasterFrame> {
    match payload.first() {
        Some(b'{') => Ok(MasterFrame::Control(serde_json::from_slice(payload)?)),
        Some(b'0'..=b'9') => Ok(MasterFrame::Request(Box::new(jsonnpy::loads(payload)?))),
        _ => Err(EngineError::Network("unrecognized frame".to_string())),
    }
}

pub fn encode_worker_frame(frame: &WorkerFrame) -> Result<Vec<u8>> {
    jsonnpy::dumps(frame)
}

pub fn decode_worker_frame(payload: &[u8]) -> Result<WorkerFrame> {
    jsonnpy::loads(payload)
}

/// The worker's final frame for a finished request.
pub fn final_frame(result: &Result<Option<MapOut>>) -> WorkerFrame {
    match result {
        Ok(value) => WorkerFrame::Result {
            value: value.clone(),
        },
        Err(e) if e.is_user() => WorkerFrame::UserError {
            reason: e.to_string(),
        },
        Err(e) => WorkerFrame::Error {
            reason: e.to_string(),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::execution::{PlanMode, QueryPlan};
    use crate::kernel::{NdArray, Vector};
    use crate::parser::Select;

    fn request() -> WorkerRequest {
        WorkerRequest {
            request_id: "req-1".to_string(),
            plan: QueryPlan {
                select: Select::parse("SELECT object_id FROM test LIMIT 3").unwrap(),
                mode: PlanMode::NonAgg { streaming: false },
            },
            shared: SharedValues::new(),
            chunksize: None,
        }
    }

    #[test]
    fn request_round_trip() {
        let req = request();
        let bytes = encode_request(&req).unwrap();
        match decode_master_frame(&bytes).unwrap() {
            MasterFrame::Request(r) => {
                assert_eq!(r.request_id, "req-1");
                assert_eq!(r.plan.select, req.plan.select);
            }
            other => panic!("unexpected frame: {:?}", other),
        }
    }

    #[test]
    fn interrupt_is_plain_json() {
        let bytes = encode_control(&ControlFrame::Interrupt).unwrap();
        assert_eq!(bytes.first(), Some(&b'{'));
        match decode_master_frame(&bytes).unwrap() {
            MasterFrame::Control(ControlFrame::Interrupt) => {}
            other => panic!("unexpected frame: {:?}", other),
        }
    }

    #[test]
    fn worker_frames_round_trip() {
        let frames = [
            WorkerFrame::Progress {
                progress: Progress {
                    done: 1,
                    total: 4,
                    data: None,
                },
            },
            WorkerFrame::Result {
                value: Some(MapOut::Rows {
                    targets: vec![NdArray::Vector(Vector::Int(vec![1, 2]))],
                    sort_keys: None,
                }),
            },
            WorkerFrame::UserError {
                reason: "Cancelled".to_string(),
            },
        ];
        for f in frames {
            let bytes = encode_worker_frame(&f).unwrap();
            let back = decode_worker_frame(&bytes).unwrap();
            match (&f, &back) {
                (WorkerFrame::Progress { progress: a }, WorkerFrame::Progress { progress: b }) => {
                    assert_eq!(a, b)
                }
                (WorkerFrame::Result { .. }, WorkerFrame::Result { .. }) => {}
                (WorkerFrame::UserError { reason: a }, WorkerFrame::UserError { reason: b }) => {
                    assert_eq!(a, b)
                }
                other => panic!("frame changed shape: {:?}", other),
            }
        }
    }
}
