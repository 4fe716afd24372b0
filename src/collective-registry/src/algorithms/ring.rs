use crate::params::{CollectiveParams, CollectiveType, ParamsError};
use crate::registry::CollectiveImplementation;

use super::{check_type, RING_GATHER, RING_REDUCE};

/// Builds one ring permutation per subdivision offset.
///
/// Within each task the devices are rotated by the offset (negative offsets
/// wrap around), and tasks are concatenated in task order. `subdiv_rank`
/// receives the position of `default_rank` in each ring.
pub(crate) fn generate_ring_subdivs(
    params: &mut CollectiveParams,
    offsets: &[i64],
) -> Result<(), ParamsError> {
    let devices_per_task = params.group.devices_per_task()?;
    let mut permutations = Vec::with_capacity(offsets.len());
    let mut subdiv_rank = Vec::with_capacity(offsets.len());

    for &offset in offsets {
        let mut perm = Vec::with_capacity(params.group.group_size);
        let mut rank = None;
        let mut prior_devices = 0;
        for &count in &devices_per_task {
            // reduced first so large offsets cannot overflow
            let shift = offset.rem_euclid(count as i64) as usize;
            for di in 0..count {
                let rotated = (di + shift) % count;
                let device = prior_devices + rotated;
                if device == params.default_rank {
                    rank = Some(perm.len());
                }
                perm.push(device);
            }
            prior_devices += count;
        }
        permutations.push(perm);
        subdiv_rank.push(rank);
    }

    let details = &mut params.instance.impl_details;
    details.subdiv_offsets = offsets.to_vec();
    details.subdiv_permutations = permutations;
    details.subdiv_source_rank.clear();
    params.subdiv_rank = subdiv_rank;
    Ok(())
}

/// Param resolver for ring all-reduce.
#[derive(Debug, Clone)]
pub struct RingReducer {
    default_offsets: Vec<i64>,
}

impl RingReducer {
    pub fn new(default_offsets: Vec<i64>) -> Self {
        RingReducer { default_offsets }
    }
}

impl Default for RingReducer {
    fn default() -> Self {
        Self::new(vec![0])
    }
}

impl CollectiveImplementation for RingReducer {
    fn name(&self) -> &str {
        RING_REDUCE
    }

    fn initialize_collective_params(
        &self,
        params: &mut CollectiveParams,
    ) -> Result<(), ParamsError> {
        check_type(self, params, CollectiveType::AllReduce)?;
        params.validate()?;
        let offsets = if params.instance.impl_details.subdiv_offsets.is_empty() {
            self.default_offsets.clone()
        } else {
            params.instance.impl_details.subdiv_offsets.clone()
        };
        generate_ring_subdivs(params, &offsets)?;
        log::debug!(
            "{} resolved {} subdivisions for {}",
            RING_REDUCE,
            offsets.len(),
            params.name
        );
        Ok(())
    }
}

/// Param resolver for ring gather, which always runs a single unshifted ring.
#[derive(Debug, Clone, Copy, Default)]
pub struct RingGatherer;

impl CollectiveImplementation for RingGatherer {
    fn name(&self) -> &str {
        RING_GATHER
    }

    fn initialize_collective_params(
        &self,
        params: &mut CollectiveParams,
    ) -> Result<(), ParamsError> {
        check_type(self, params, CollectiveType::Gather)?;
        params.validate()?;
        let offsets = &params.instance.impl_details.subdiv_offsets;
        if offsets.len() > 1 || offsets.iter().any(|&offset| offset != 0) {
            return Err(ParamsError::UnsupportedSubdivOffsets {
                resolver: RING_GATHER.to_string(),
                offsets: offsets.clone(),
            });
        }
        generate_ring_subdivs(params, &[0])
    }
}
