use std::collections::BTreeMap;

use uuid::Uuid;

use crate::error::DataflowError;
use crate::model::{PinValue, Timestamp};

/// External destination a terminal node writes its outputs to.
///
/// Called on the controlling thread after the terminal's evaluation finished,
/// with the outputs that evaluation produced, keyed by slot name.
pub trait TerminalSink {
    fn write(
        &mut self,
        node: Uuid,
        values: &BTreeMap<String, PinValue>,
    ) -> Result<(), DataflowError>;
}

impl<F> TerminalSink for F
where
    F: FnMut(Uuid, &BTreeMap<String, PinValue>) -> Result<(), DataflowError>,
{
    fn write(
        &mut self,
        node: Uuid,
        values: &BTreeMap<String, PinValue>,
    ) -> Result<(), DataflowError> {
        self(node, values)
    }
}

pub(crate) struct TerminalBinding {
    pub sink: Box<dyn TerminalSink>,
    pub last_modified: Timestamp,
}

impl TerminalBinding {
    pub fn new(sink: Box<dyn TerminalSink>) -> Self {
        Self {
            sink,
            last_modified: Timestamp::INVALID,
        }
    }
}
