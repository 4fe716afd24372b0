use crate::params::{CollectiveParams, CollectiveType, ParamsError};
use crate::registry::CollectiveImplementation;

use super::{check_type, HIERARCHICAL_TREE_BROADCAST};

/// Param resolver for a two-level tree broadcast.
///
/// With more than one task, subdivision 0 connects one leader per task: the
/// source device inside its own task, the first device of every other task.
/// Every task then gets its own subdivision over its devices, rooted at the
/// source or at the task leader.
#[derive(Debug, Clone, Copy, Default)]
pub struct HierarchicalTreeBroadcaster;

impl CollectiveImplementation for HierarchicalTreeBroadcaster {
    fn name(&self) -> &str {
        HIERARCHICAL_TREE_BROADCAST
    }

    fn initialize_collective_params(
        &self,
        params: &mut CollectiveParams,
    ) -> Result<(), ParamsError> {
        check_type(self, params, CollectiveType::Broadcast)?;
        params.validate()?;
        let source = params.source().ok_or_else(|| ParamsError::MissingSource {
            name: params.name.clone(),
        })?;
        let devices_per_task = params.group.devices_per_task()?;
        let default_rank = params.default_rank;

        let num_subdivs = devices_per_task.len() + usize::from(devices_per_task.len() > 1);
        let mut permutations = Vec::with_capacity(num_subdivs);
        let mut source_ranks = Vec::with_capacity(num_subdivs);
        let mut subdiv_rank = Vec::with_capacity(num_subdivs);

        if devices_per_task.len() > 1 {
            let mut leaders = Vec::with_capacity(devices_per_task.len());
            let mut source_task = 0;
            let mut first = 0;
            for (task, &count) in devices_per_task.iter().enumerate() {
                if (first..first + count).contains(&source) {
                    source_task = task;
                    leaders.push(source);
                } else {
                    leaders.push(first);
                }
                first += count;
            }
            subdiv_rank.push(leaders.iter().position(|&device| device == default_rank));
            permutations.push(leaders);
            source_ranks.push(source_task);
        }

        let mut first = 0;
        for &count in &devices_per_task {
            let devices = first..first + count;
            source_ranks.push(if devices.contains(&source) {
                source - first
            } else {
                0
            });
            subdiv_rank.push(if devices.contains(&default_rank) {
                Some(default_rank - first)
            } else {
                None
            });
            permutations.push(devices.collect());
            first += count;
        }

        log::debug!(
            "{} resolved {} subdivisions for {} rooted at rank {}",
            HIERARCHICAL_TREE_BROADCAST,
            permutations.len(),
            params.name,
            source
        );
        let details = &mut params.instance.impl_details;
        details.subdiv_permutations = permutations;
        details.subdiv_source_rank = source_ranks;
        params.subdiv_rank = subdiv_rank;
        Ok(())
    }
}
