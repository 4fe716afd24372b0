use std::fmt;

use serde::{Deserialize, Serialize};

use super::{is_partial_permutation, is_permutation, write_list, ParamsError};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CollectiveType {
    AllReduce,
    Broadcast,
    Gather,
    PermuteCollective,
}

impl CollectiveType {
    pub fn as_str(&self) -> &'static str {
        match self {
            CollectiveType::AllReduce => "ALL_REDUCE",
            CollectiveType::Broadcast => "BROADCAST",
            CollectiveType::Gather => "GATHER",
            CollectiveType::PermuteCollective => "PERMUTE_COLLECTIVE",
        }
    }
}

impl fmt::Display for CollectiveType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DataType {
    #[serde(rename = "DT_HALF")]
    Half,
    #[serde(rename = "DT_BFLOAT16")]
    BFloat16,
    #[serde(rename = "DT_FLOAT")]
    Float,
    #[serde(rename = "DT_DOUBLE")]
    Double,
    #[serde(rename = "DT_INT32")]
    Int32,
    #[serde(rename = "DT_INT64")]
    Int64,
    #[serde(rename = "DT_UINT8")]
    UInt8,
}

impl DataType {
    pub fn as_str(&self) -> &'static str {
        match self {
            DataType::Half => "DT_HALF",
            DataType::BFloat16 => "DT_BFLOAT16",
            DataType::Float => "DT_FLOAT",
            DataType::Double => "DT_DOUBLE",
            DataType::Int32 => "DT_INT32",
            DataType::Int64 => "DT_INT64",
            DataType::UInt8 => "DT_UINT8",
        }
    }

    pub fn size_of(&self) -> usize {
        match self {
            DataType::UInt8 => 1,
            DataType::Half | DataType::BFloat16 => 2,
            DataType::Float | DataType::Int32 => 4,
            DataType::Double | DataType::Int64 => 8,
        }
    }
}

impl fmt::Display for DataType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TensorShape(pub Vec<usize>);

impl TensorShape {
    /// Element count, `None` if it does not fit in `usize`.
    pub fn num_elements(&self) -> Option<usize> {
        self.0
            .iter()
            .try_fold(1usize, |acc, &dim| acc.checked_mul(dim))
    }
}

impl fmt::Display for TensorShape {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("[")?;
        for (i, dim) in self.0.iter().enumerate() {
            if i > 0 {
                f.write_str(",")?;
            }
            write!(f, "{}", dim)?;
        }
        f.write_str("]")
    }
}

/// Implementation-specific metadata, mostly filled in by a param resolver.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct ImplDetails {
    pub collective_name: String,
    pub subdiv_offsets: Vec<i64>,
    pub subdiv_permutations: Vec<Vec<usize>>,
    pub subdiv_source_rank: Vec<usize>,
    // names of collectives this instance runs after
    pub dependencies: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CollInstanceParams {
    pub instance_key: i32,
    #[serde(rename = "type")]
    pub ty: CollectiveType,
    pub data_type: DataType,
    #[serde(default)]
    pub shape: TensorShape,
    #[serde(default)]
    pub impl_details: ImplDetails,
    // permute only
    #[serde(default)]
    pub devices: Vec<String>,
    #[serde(default)]
    pub permutation: Vec<usize>,
}

impl CollInstanceParams {
    pub fn is_permute(&self) -> bool {
        self.ty == CollectiveType::PermuteCollective
    }

    pub fn validate(&self, group_size: usize) -> Result<(), ParamsError> {
        if self.is_permute() {
            if self.devices.is_empty() {
                return Err(ParamsError::MissingPermuteDevices);
            }
            if !is_permutation(&self.permutation, self.devices.len()) {
                return Err(ParamsError::InvalidPermutation {
                    devices: self.devices.len(),
                    permutation: self.permutation.clone(),
                });
            }
        } else if !self.devices.is_empty() || !self.permutation.is_empty() {
            return Err(ParamsError::PermuteFieldsOnNonPermute { ty: self.ty });
        }

        let details = &self.impl_details;
        for (subdiv, perm) in details.subdiv_permutations.iter().enumerate() {
            // broadcast subdivisions cover a subset of the group
            let valid = match self.ty {
                CollectiveType::Broadcast => is_partial_permutation(perm, group_size),
                _ => is_permutation(perm, group_size),
            };
            if !valid {
                return Err(ParamsError::InvalidSubdivPermutation {
                    subdiv,
                    permutation: perm.clone(),
                    group_size,
                });
            }
        }

        if !details.subdiv_source_rank.is_empty() {
            if details.subdiv_source_rank.len() != details.subdiv_permutations.len() {
                return Err(ParamsError::SubdivSourceRankMismatch {
                    expected: details.subdiv_permutations.len(),
                    found: details.subdiv_source_rank.len(),
                });
            }
            let ranks = details.subdiv_source_rank.iter();
            for (subdiv, (&rank, perm)) in ranks.zip(&details.subdiv_permutations).enumerate() {
                if rank >= perm.len() {
                    return Err(ParamsError::SubdivSourceRankOutOfRange { subdiv, rank });
                }
            }
        }
        Ok(())
    }
}

impl fmt::Display for CollInstanceParams {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let details = &self.impl_details;
        write!(
            f,
            "CollInstanceParams {{instance_key={} type={} data_type={} shape={} collective_name={} subdiv_offsets=",
            self.instance_key, self.ty, self.data_type, self.shape, details.collective_name
        )?;
        write_list(f, &details.subdiv_offsets)?;
        f.write_str(" subdiv_perms={")?;
        for perm in &details.subdiv_permutations {
            write_list(f, perm)?;
        }
        f.write_str("}")?;
        if !details.subdiv_source_rank.is_empty() {
            f.write_str(" subdiv_source_rank=")?;
            write_list(f, &details.subdiv_source_rank)?;
        }
        f.write_str(" dependencies=")?;
        write_list(f, &details.dependencies)?;
        if self.is_permute() {
            f.write_str(" permute_devices=")?;
            write_list(f, &self.devices)?;
            f.write_str(" permute_permutation=")?;
            write_list(f, &self.permutation)?;
        }
        f.write_str("}")
    }
}

#[cfg(test)]
mod tests {
    use super::super::tests::instance;
    use super::*;

    fn permute() -> CollInstanceParams {
        let mut instance = instance(CollectiveType::PermuteCollective, "Permute");
        instance.devices = vec!["/gpu:0".into(), "/gpu:1".into(), "/gpu:2".into()];
        instance.permutation = vec![2, 0, 1];
        instance
    }

    #[test]
    fn render_permute_sections_only_for_permute() {
        let text = permute().to_string();
        assert!(text.contains("type=PERMUTE_COLLECTIVE"));
        assert!(text.contains("permute_devices={/gpu:0,/gpu:1,/gpu:2}"));
        assert!(text.contains("permute_permutation={2,0,1}"));

        for ty in [
            CollectiveType::AllReduce,
            CollectiveType::Broadcast,
            CollectiveType::Gather,
        ] {
            let text = instance(ty, "Ring").to_string();
            assert!(!text.contains("permute_devices"));
            assert!(!text.contains("permute_permutation"));
        }
    }

    #[test]
    fn render_impl_details() {
        let mut instance = instance(CollectiveType::Broadcast, "HierarchicalTreeBroadcast");
        instance.impl_details.subdiv_offsets = vec![0, -1];
        instance.impl_details.subdiv_permutations = vec![vec![0, 2], vec![0, 1]];
        instance.impl_details.dependencies = vec!["RingReduce".into()];
        let text = instance.to_string();
        assert_eq!(
            text,
            "CollInstanceParams {instance_key=7 type=BROADCAST data_type=DT_FLOAT shape=[4,8] \
             collective_name=HierarchicalTreeBroadcast subdiv_offsets={0,-1} \
             subdiv_perms={{0,2}{0,1}} dependencies={RingReduce}}"
        );

        instance.impl_details.subdiv_source_rank = vec![1, 0];
        assert!(instance
            .to_string()
            .contains("subdiv_perms={{0,2}{0,1}} subdiv_source_rank={1,0} dependencies"));
    }

    #[test]
    fn permute_fields_require_permute_type() {
        let mut instance = instance(CollectiveType::Gather, "RingGather");
        assert_eq!(instance.validate(4), Ok(()));
        instance.permutation = vec![0];
        assert_eq!(
            instance.validate(4),
            Err(ParamsError::PermuteFieldsOnNonPermute {
                ty: CollectiveType::Gather
            })
        );
    }

    #[test]
    fn permute_requires_bijection() {
        let mut instance = permute();
        assert_eq!(instance.validate(3), Ok(()));
        instance.permutation = vec![0, 0, 1];
        assert!(matches!(
            instance.validate(3),
            Err(ParamsError::InvalidPermutation { devices: 3, .. })
        ));
        instance.devices.clear();
        instance.permutation.clear();
        assert_eq!(instance.validate(3), Err(ParamsError::MissingPermuteDevices));
    }

    #[test]
    fn subdiv_permutations_cover_the_group() {
        let mut instance = instance(CollectiveType::AllReduce, "RingReduce");
        instance.impl_details.subdiv_permutations = vec![vec![1, 0, 3, 2]];
        assert_eq!(instance.validate(4), Ok(()));
        instance.impl_details.subdiv_permutations.push(vec![0, 1]);
        assert!(matches!(
            instance.validate(4),
            Err(ParamsError::InvalidSubdivPermutation { subdiv: 1, .. })
        ));
    }

    #[test]
    fn subdiv_source_ranks_match_subdivisions() {
        let mut instance = instance(CollectiveType::Broadcast, "HierarchicalTreeBroadcast");
        instance.impl_details.subdiv_permutations = vec![vec![0, 2], vec![0, 1], vec![2, 3]];
        instance.impl_details.subdiv_source_rank = vec![0, 0];
        assert_eq!(
            instance.validate(4),
            Err(ParamsError::SubdivSourceRankMismatch {
                expected: 3,
                found: 2
            })
        );
        instance.impl_details.subdiv_source_rank = vec![0, 0, 2];
        assert_eq!(
            instance.validate(4),
            Err(ParamsError::SubdivSourceRankOutOfRange { subdiv: 2, rank: 2 })
        );
    }

    #[test]
    fn num_elements_checks_overflow() {
        assert_eq!(TensorShape(vec![4, 8]).num_elements(), Some(32));
        assert_eq!(TensorShape(vec![]).num_elements(), Some(1));
        assert_eq!(TensorShape(vec![3, 0]).num_elements(), Some(0));
        assert_eq!(TensorShape(vec![usize::MAX, 2]).num_elements(), None);
    }

    #[test]
    fn parse_instance_from_toml() {
        let instance: CollInstanceParams = toml::from_str(
            r#"
            instance_key = 11
            type = "PERMUTE_COLLECTIVE"
            data_type = "DT_HALF"
            shape = [128]
            devices = ["/gpu:0", "/gpu:1"]
            permutation = [1, 0]

            [impl_details]
            collective_name = "Permute"
            "#,
        )
        .unwrap();
        assert_eq!(instance.ty, CollectiveType::PermuteCollective);
        assert_eq!(instance.data_type.size_of(), 2);
        assert_eq!(instance.shape.num_elements(), Some(128));
        assert_eq!(instance.validate(2), Ok(()));
    }
}
