//! Evaluation events and the bus that dispatches them.

use log::{debug, error, info, warn};
use uuid::Uuid;

use crate::util::observers::{Observers, SubscriptionId};

#[derive(Clone, Debug, PartialEq)]
pub enum EvaluationEvent {
    BeginEvaluate {
        node: Uuid,
        output: String,
    },
    FinishEvaluate {
        node: Uuid,
        output: String,
    },
    Info {
        node: Option<Uuid>,
        output: Option<String>,
        message: String,
    },
    Warning {
        node: Option<Uuid>,
        output: Option<String>,
        message: String,
    },
    Error {
        node: Option<Uuid>,
        output: Option<String>,
        message: String,
    },
}

impl EvaluationEvent {
    pub fn info(node: Option<Uuid>, output: Option<&str>, message: impl Into<String>) -> Self {
        EvaluationEvent::Info {
            node,
            output: output.map(str::to_string),
            message: message.into(),
        }
    }

    pub fn warning(node: Option<Uuid>, output: Option<&str>, message: impl Into<String>) -> Self {
        EvaluationEvent::Warning {
            node,
            output: output.map(str::to_string),
            message: message.into(),
        }
    }

    pub fn error(node: Option<Uuid>, output: Option<&str>, message: impl Into<String>) -> Self {
        EvaluationEvent::Error {
            node,
            output: output.map(str::to_string),
            message: message.into(),
        }
    }

    pub fn is_error(&self) -> bool {
        matches!(self, EvaluationEvent::Error { .. })
    }

    pub fn is_warning(&self) -> bool {
        matches!(self, EvaluationEvent::Warning { .. })
    }

    fn log(&self) {
        match self {
            EvaluationEvent::BeginEvaluate { node, output } => {
                debug!("Begin evaluate {}.{}", node, output)
            }
            EvaluationEvent::FinishEvaluate { node, output } => {
                debug!("Finish evaluate {}.{}", node, output)
            }
            EvaluationEvent::Info { message, .. } => info!("{}", message),
            EvaluationEvent::Warning {
                node,
                output,
                message,
            } => warn!("{} ({:?}.{:?})", message, node, output),
            EvaluationEvent::Error {
                node,
                output,
                message,
            } => error!("{} ({:?}.{:?})", message, node, output),
        }
    }
}

/// Subscriber list plus warning/error counters.
#[derive(Default)]
pub struct EventBus {
    observers: Observers<EvaluationEvent>,
    num_warnings: usize,
    num_errors: usize,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe(
        &mut self,
        callback: impl FnMut(&EvaluationEvent) + 'static,
    ) -> SubscriptionId {
        self.observers.subscribe(callback)
    }

    pub fn unsubscribe(&mut self, id: SubscriptionId) -> bool {
        self.observers.unsubscribe(id)
    }

    pub fn publish(&mut self, event: EvaluationEvent) {
        event.log();
        match &event {
            EvaluationEvent::Warning { .. } => self.num_warnings += 1,
            EvaluationEvent::Error { .. } => self.num_errors += 1,
            _ => {}
        }
        self.observers.notify(&event);
    }

    pub fn num_warnings(&self) -> usize {
        self.num_warnings
    }

    pub fn num_errors(&self) -> usize {
        self.num_errors
    }

    pub fn reset_counters(&mut self) {
        self.num_warnings = 0;
        self.num_errors = 0;
    }
}
