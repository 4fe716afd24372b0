use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

pub mod group;
pub mod instance;

pub use group::{CollGroupParams, CollGroupRuntimeDetails, Device, DeviceType};
pub use instance::{CollInstanceParams, CollectiveType, DataType, ImplDetails, TensorShape};

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ParamsError {
    #[error("Group size {group_size} does not match {members} members")]
    GroupSizeMismatch { group_size: usize, members: usize },
    #[error("Group must span at least one task")]
    NoTasks,
    #[error("Task {task} out of range for {num_tasks} tasks")]
    TaskOutOfRange { task: usize, num_tasks: usize },
    #[error("Task {task} has no devices")]
    EmptyTask { task: usize },
    #[error("Devices per task sum to {total}, expected group size {group_size}")]
    TaskDeviceCountMismatch { group_size: usize, total: usize },
    #[error("Devices per task are required for a group spanning {num_tasks} tasks")]
    MissingTaskLayout { num_tasks: usize },
    #[error("Permute devices or permutation set on a {ty} collective")]
    PermuteFieldsOnNonPermute { ty: CollectiveType },
    #[error("Permute collective has no devices")]
    MissingPermuteDevices,
    #[error("Permutation {permutation:?} is not a bijection over {devices} devices")]
    InvalidPermutation {
        devices: usize,
        permutation: Vec<usize>,
    },
    #[error("Subdivision {subdiv} permutation {permutation:?} is invalid for group size {group_size}")]
    InvalidSubdivPermutation {
        subdiv: usize,
        permutation: Vec<usize>,
        group_size: usize,
    },
    #[error("Expected {expected} subdivision source ranks, found {found}")]
    SubdivSourceRankMismatch { expected: usize, found: usize },
    #[error("Subdivision {subdiv} source rank {rank} out of range")]
    SubdivSourceRankOutOfRange { subdiv: usize, rank: usize },
    #[error("Rank {rank} out of range for group size {group_size}")]
    RankOutOfRange { rank: usize, group_size: usize },
    #[error("Source device has rank {default_rank} but source rank is {source_rank}")]
    SourceRankMismatch {
        default_rank: usize,
        source_rank: usize,
    },
    #[error("Expected {expected} subdivision ranks, found {found}")]
    SubdivRankMismatch { expected: usize, found: usize },
    #[error("Collective {name} requires a source rank")]
    MissingSource { name: String },
    #[error("{resolver} resolves {expected} collectives, got {found}")]
    UnexpectedType {
        resolver: String,
        expected: CollectiveType,
        found: CollectiveType,
    },
    #[error("{resolver} does not support subdivision offsets {offsets:?}")]
    UnsupportedSubdivOffsets { resolver: String, offsets: Vec<i64> },
}

/// Full descriptor of one collective operation as seen by one participant.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CollectiveParams {
    pub name: String,
    pub group: CollGroupParams,
    pub instance: CollInstanceParams,
    pub default_rank: usize,
    #[serde(default)]
    pub is_source: bool,
    #[serde(default)]
    pub source_rank: Option<usize>,
    // one entry per subdivision, None if this device is not part of it
    #[serde(default)]
    pub subdiv_rank: Vec<Option<usize>>,
}

impl CollectiveParams {
    pub fn new(
        name: impl Into<String>,
        group: CollGroupParams,
        instance: CollInstanceParams,
    ) -> Self {
        CollectiveParams {
            name: name.into(),
            group,
            instance,
            default_rank: 0,
            is_source: false,
            source_rank: None,
            subdiv_rank: Vec::new(),
        }
    }

    /// Rank of the source device, if the operation has one.
    pub fn source(&self) -> Option<usize> {
        if self.is_source {
            Some(self.default_rank)
        } else {
            self.source_rank
        }
    }

    pub fn num_subdivs(&self) -> usize {
        self.instance.impl_details.subdiv_permutations.len()
    }

    pub fn validate(&self) -> Result<(), ParamsError> {
        self.group.validate()?;
        self.instance.validate(self.group.group_size)?;

        let group_size = self.group.group_size;
        if self.default_rank >= group_size {
            return Err(ParamsError::RankOutOfRange {
                rank: self.default_rank,
                group_size,
            });
        }
        if let Some(source_rank) = self.source_rank {
            if source_rank >= group_size {
                return Err(ParamsError::RankOutOfRange {
                    rank: source_rank,
                    group_size,
                });
            }
            if self.is_source && source_rank != self.default_rank {
                return Err(ParamsError::SourceRankMismatch {
                    default_rank: self.default_rank,
                    source_rank,
                });
            }
        }

        if !self.subdiv_rank.is_empty() {
            let perms = &self.instance.impl_details.subdiv_permutations;
            if self.subdiv_rank.len() != perms.len() {
                return Err(ParamsError::SubdivRankMismatch {
                    expected: perms.len(),
                    found: self.subdiv_rank.len(),
                });
            }
            for (rank, perm) in self.subdiv_rank.iter().zip(perms) {
                if let Some(rank) = *rank {
                    if rank >= perm.len() {
                        return Err(ParamsError::RankOutOfRange {
                            rank,
                            group_size: perm.len(),
                        });
                    }
                }
            }
        }
        Ok(())
    }
}

impl fmt::Display for CollectiveParams {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "CollectiveParams {} {{{} {}", self.name, self.group, self.instance)?;
        write!(
            f,
            " default_rank={} is_source={} source_rank=",
            self.default_rank, self.is_source
        )?;
        match self.source_rank {
            Some(rank) => write!(f, "{}", rank)?,
            None => f.write_str("none")?,
        }
        f.write_str(" subdiv_rank={")?;
        for (i, rank) in self.subdiv_rank.iter().enumerate() {
            if i > 0 {
                f.write_str(",")?;
            }
            match rank {
                Some(rank) => write!(f, "{}", rank)?,
                None => f.write_str("-")?,
            }
        }
        f.write_str("}}")
    }
}

pub(crate) fn write_list<T: fmt::Display>(f: &mut fmt::Formatter<'_>, items: &[T]) -> fmt::Result {
    f.write_str("{")?;
    for (i, item) in items.iter().enumerate() {
        if i > 0 {
            f.write_str(",")?;
        }
        write!(f, "{}", item)?;
    }
    f.write_str("}")
}

/// Whether `perm` holds every index in `0..len` exactly once.
pub(crate) fn is_permutation(perm: &[usize], len: usize) -> bool {
    if perm.len() != len {
        return false;
    }
    let mut seen = vec![false; len];
    for &idx in perm {
        if idx >= len || seen[idx] {
            return false;
        }
        seen[idx] = true;
    }
    true
}

/// Whether `perm` holds distinct indices below `len`.
pub(crate) fn is_partial_permutation(perm: &[usize], len: usize) -> bool {
    let mut seen = vec![false; len];
    for &idx in perm {
        if idx >= len || seen[idx] {
            return false;
        }
        seen[idx] = true;
    }
    !perm.is_empty()
}
