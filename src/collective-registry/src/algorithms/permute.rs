use crate::params::{CollectiveParams, CollectiveType, ParamsError};
use crate::registry::CollectiveImplementation;

use super::{check_type, PERMUTE};

/// Param resolver for permute collectives. Each device sends to
/// `permutation[rank]`; there is no subdivision plan.
#[derive(Debug, Clone, Copy, Default)]
pub struct Permuter;

impl CollectiveImplementation for Permuter {
    fn name(&self) -> &str {
        PERMUTE
    }

    fn initialize_collective_params(
        &self,
        params: &mut CollectiveParams,
    ) -> Result<(), ParamsError> {
        check_type(self, params, CollectiveType::PermuteCollective)?;
        params.validate()?;
        let devices = params.instance.devices.len();
        if params.default_rank >= devices {
            return Err(ParamsError::RankOutOfRange {
                rank: params.default_rank,
                group_size: devices,
            });
        }
        Ok(())
    }
}
