//! Incident manager.
//!
//! Converts recoverable failures into persisted incidents and re-drives
//! the blocked command once an incident is resolved. Incidents never
//! terminate the element instance; other branches of the same process
//! instance keep progressing while one is open.

use tracing::{info, warn};

use crate::domain::{BlockedIntent, Command, ElementContext, Failure, Incident, RecordBody};

use super::{Engine, EngineError};

impl Engine {
    /// Persist a failure as an incident on the raising element instance.
    ///
    /// At most one incident is open per element instance; a re-driven
    /// command that fails again keeps the existing one.
    pub(crate) fn create_incident(
        &mut self,
        failure: Failure,
        ctx: &ElementContext,
        blocked: BlockedIntent,
    ) {
        if !self
            .state
            .incidents_for_element(ctx.element_instance_key)
            .is_empty()
        {
            warn!(
                element = %ctx.element_id,
                element_key = ctx.element_instance_key,
                "Transition still failing: {}",
                failure.message
            );
            return;
        }
        let key = self.generate_key();
        warn!(
            element = %ctx.element_id,
            element_key = ctx.element_instance_key,
            kind = ?failure.kind,
            "Incident: {}",
            failure.message
        );
        self.append(RecordBody::IncidentCreated(Incident {
            key,
            element_instance_key: ctx.element_instance_key,
            process_instance_key: ctx.process_instance_key,
            failure,
            blocked,
        }));
    }

    /// Resolve an open incident and re-drive the transition it blocked.
    pub fn resolve_incident(&mut self, incident_key: u64) -> Result<(), EngineError> {
        let incident = self
            .state
            .incident(incident_key)
            .cloned()
            .ok_or(EngineError::UnknownIncident(incident_key))?;

        info!(
            incident_key,
            element_key = incident.element_instance_key,
            "Resolving incident"
        );
        self.append(RecordBody::IncidentResolved { incident_key });

        let command = match incident.blocked {
            BlockedIntent::Activate => {
                let instance = self
                    .state
                    .instance(incident.element_instance_key)
                    .ok_or(EngineError::UnknownInstance(incident.element_instance_key))?;
                Command::ActivateElement {
                    record: ElementContext::from(instance).to_record(),
                    variables: Vec::new(),
                }
            }
            BlockedIntent::Complete => Command::CompleteElement {
                element_instance_key: incident.element_instance_key,
            },
        };
        self.enqueue(command);
        self.run_to_idle()
    }

    /// Resolve every open incident of a terminating element without
    /// re-driving anything; the instance is going away.
    pub(crate) fn resolve_incidents_for(&mut self, element_instance_key: u64) {
        let keys: Vec<u64> = self
            .state
            .incidents_for_element(element_instance_key)
            .into_iter()
            .map(|i| i.key)
            .collect();
        for incident_key in keys {
            self.append(RecordBody::IncidentResolved { incident_key });
        }
    }
}
