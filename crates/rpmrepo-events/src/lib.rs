mod event;
mod sink;

use std::sync::{
    atomic::{AtomicU64, Ordering},
    Arc,
};

pub use event::*;
pub use sink::*;

/// Unique identifier for a running operation.
pub type OperationId = u64;

/// Shared handle to an event sink.
pub type EventSinkHandle = Arc<dyn EventSink>;

static NEXT_OP_ID: AtomicU64 = AtomicU64::new(1);

/// Allocates a process-unique operation id.
pub fn next_op_id() -> OperationId {
    NEXT_OP_ID.fetch_add(1, Ordering::Relaxed)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_null_sink() {
        let sink = NullSink;
        sink.emit(RepoEvent::Log {
            level: LogLevel::Info,
            message: "test".to_string(),
        });
    }

    #[test]
    fn test_channel_sink() {
        let (sink, rx) = ChannelSink::new();
        sink.emit(RepoEvent::Received {
            op_id: 1,
            key: "upload/demo-1.0.0-1.el8.x86_64.rpm".to_string(),
        });
        sink.emit(RepoEvent::Classified {
            op_id: 1,
            key: "upload/demo-1.0.0-1.el8.x86_64.rpm".to_string(),
            stage: ClassifyStage::Placed {
                destination: "el/8/demo-1.0.0-1.el8.x86_64.rpm".to_string(),
            },
        });
        sink.emit(RepoEvent::Merge {
            op_id: 1,
            repository: "el/8".to_string(),
            stage: MergeStage::Published { packages: 1 },
        });

        let events: Vec<_> = rx.try_iter().collect();
        assert_eq!(events.len(), 3);
        assert!(matches!(&events[0], RepoEvent::Received { op_id: 1, .. }));
        assert!(matches!(
            &events[1],
            RepoEvent::Classified {
                stage: ClassifyStage::Placed { .. },
                ..
            }
        ));
        assert!(matches!(
            &events[2],
            RepoEvent::Merge {
                stage: MergeStage::Published { packages: 1 },
                ..
            }
        ));
    }

    #[test]
    fn test_channel_sink_receiver_dropped() {
        let (sink, rx) = ChannelSink::new();
        drop(rx);
        sink.emit(RepoEvent::Log {
            level: LogLevel::Info,
            message: "orphaned".to_string(),
        });
    }

    #[test]
    fn test_collector_sink() {
        let sink = CollectorSink::default();
        assert!(sink.is_empty());

        sink.emit(RepoEvent::Metadata {
            op_id: 3,
            package: "el/8/demo.rpm".to_string(),
            stage: MetadataStage::Indexing,
        });
        sink.emit(RepoEvent::Metadata {
            op_id: 3,
            package: "el/8/demo.rpm".to_string(),
            stage: MetadataStage::Created,
        });

        assert_eq!(sink.len(), 2);
        let events = sink.events();
        assert!(matches!(
            &events[1],
            RepoEvent::Metadata {
                stage: MetadataStage::Created,
                ..
            }
        ));

        sink.clear();
        assert!(sink.is_empty());
    }

    #[test]
    fn test_event_sink_handle() {
        let collector = Arc::new(CollectorSink::default());
        let sink: EventSinkHandle = collector.clone();
        sink.emit(RepoEvent::BatchProgress {
            completed: 1,
            total: 2,
            failed: 0,
        });
        assert_eq!(collector.len(), 1);
    }

    #[test]
    fn test_op_id() {
        let event = RepoEvent::OperationFailed {
            op_id: 9,
            key: "upload/x.rpm".into(),
            error: "store unavailable".into(),
            retryable: true,
        };
        assert_eq!(event.op_id(), Some(9));
        assert_eq!(
            RepoEvent::StagingCollected {
                key: ".staging/x".into()
            }
            .op_id(),
            None
        );
    }

    #[test]
    fn test_next_op_id_is_unique() {
        let a = next_op_id();
        let b = next_op_id();
        assert_ne!(a, b);
    }

    #[test]
    fn test_event_sink_is_send_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<NullSink>();
        assert_send_sync::<ChannelSink>();
        assert_send_sync::<CollectorSink>();
    }
}
