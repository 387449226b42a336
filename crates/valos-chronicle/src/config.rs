// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Chronicle construction parameters.
use serde::{Deserialize, Serialize};

use crate::plot::{is_valid_resource_id, PlotError};

/// Parameters for [`crate::Chronicle::new`].
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ChronicleConfig {
    /// Raw id of the chronicle root resource; also the log key.
    pub chronicle_id: String,
    /// Initial `requireAuthoredEvents` of the root.
    pub require_authored_events: bool,
}

impl ChronicleConfig {
    /// Config for `chronicle_id` with unauthored events allowed.
    pub fn new(chronicle_id: impl Into<String>) -> Self {
        Self {
            chronicle_id: chronicle_id.into(),
            require_authored_events: false,
        }
    }

    /// Sets the initial authored-events requirement.
    pub fn with_require_authored_events(mut self, required: bool) -> Self {
        self.require_authored_events = required;
        self
    }

    /// Checks the chronicle id against the resource id rules.
    pub fn validate(&self) -> Result<(), PlotError> {
        if is_valid_resource_id(&self.chronicle_id) {
            Ok(())
        } else {
            Err(PlotError::InvalidResourceId {
                id: self.chronicle_id.clone(),
            })
        }
    }
}

impl Default for ChronicleConfig {
    fn default() -> Self {
        Self::new("chronicle")
    }
}
