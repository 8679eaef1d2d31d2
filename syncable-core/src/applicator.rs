//! Applies processing results to a container.
//!
//! This is the apply step that follows a successful
//! [`ChangePlant::process`](crate::ChangePlant::process): creations are
//! inserted, updates are replayed from their diffs onto the live value, and
//! removals are deleted. Every update is computed before the container is
//! touched, so a result that fails to replay leaves the container unchanged.

use crate::container::SyncableContainer;
use crate::diff::apply_diffs;
use crate::error::{CoreError, CoreResult};
use crate::plant::ChangePlantProcessingResult;
use syncable_types::Syncable;
use tracing::debug;

/// Writes processing results into a [`SyncableContainer`].
#[derive(Debug)]
pub struct ContainerApplicator<'c> {
    container: &'c mut SyncableContainer,
}

impl<'c> ContainerApplicator<'c> {
    pub fn new(container: &'c mut SyncableContainer) -> Self {
        Self { container }
    }

    /// Applies `result`, returning the number of syncables affected.
    pub fn apply(&mut self, result: &ChangePlantProcessingResult) -> CoreResult<usize> {
        let mut updated = Vec::with_capacity(result.updates.len());

        for update in &result.updates {
            let reference = update.snapshot.reference();

            let live = self
                .container
                .get_syncable(&reference)
                .ok_or_else(|| CoreError::not_found(&reference))?;

            let mut value = serde_json::to_value(live)?;
            apply_diffs(&mut value, &update.diffs)?;

            updated.push(serde_json::from_value::<Syncable>(value)?);
        }

        let affected = result.creations.len() + updated.len() + result.removals.len();

        for creation in &result.creations {
            self.container.add_syncable(creation.clone());
        }

        for syncable in updated {
            self.container.add_syncable(syncable);
        }

        for removal in &result.removals {
            self.container.remove_syncable(removal);
        }

        debug!("Applied change {} ({} syncables)", result.id, affected);

        Ok(affected)
    }
}
