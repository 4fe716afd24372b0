use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

use super::ParamsError;

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Device {
    pub name: String,
}

impl Device {
    pub fn new(name: impl Into<String>) -> Self {
        Device { name: name.into() }
    }
}

impl fmt::Display for Device {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DeviceType(pub String);

impl DeviceType {
    pub fn new(ty: impl Into<String>) -> Self {
        DeviceType(ty.into())
    }
}

impl fmt::Display for DeviceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CollGroupRuntimeDetails {
    // opaque key of the communicator bound to the group
    #[serde(default)]
    pub communicator_key: String,
}

impl CollGroupRuntimeDetails {
    pub fn new(communicator_key: impl Into<String>) -> Self {
        CollGroupRuntimeDetails {
            communicator_key: communicator_key.into(),
        }
    }
}

impl fmt::Display for CollGroupRuntimeDetails {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "CollGroupRuntimeDetails {{communicator_key={}}}",
            self.communicator_key
        )
    }
}

/// The set of devices cooperating on a collective.
///
/// `members` is in rank order. Operations sharing a `group_key` are expected
/// to run over the same devices.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CollGroupParams {
    pub group_key: i32,
    pub group_size: usize,
    pub device_type: DeviceType,
    #[serde(default = "default_num_tasks")]
    pub num_tasks: usize,
    #[serde(default)]
    pub runtime_details: CollGroupRuntimeDetails,
    #[serde(default)]
    pub members: Vec<Device>,
    // task index -> number of devices
    #[serde(
        default,
        serialize_with = "serialize_num_devices_per_task",
        deserialize_with = "deserialize_num_devices_per_task"
    )]
    pub num_devices_per_task: BTreeMap<usize, usize>,
}

fn default_num_tasks() -> usize {
    1
}

fn serialize_num_devices_per_task<S>(
    map: &BTreeMap<usize, usize>,
    serializer: S,
) -> Result<S::Ok, S::Error>
where
    S: Serializer,
{
    serializer.collect_map(map.iter().map(|(task, count)| (task.to_string(), count)))
}

fn deserialize_num_devices_per_task<'de, D>(
    deserializer: D,
) -> Result<BTreeMap<usize, usize>, D::Error>
where
    D: Deserializer<'de>,
{
    let map: BTreeMap<String, usize> = Deserialize::deserialize(deserializer)?;
    map.into_iter()
        .map(|(k, v)| {
            k.parse::<usize>()
                .map_err(serde::de::Error::custom)
                .map(|task| (task, v))
        })
        .collect()
}

impl CollGroupParams {
    pub fn validate(&self) -> Result<(), ParamsError> {
        if self.group_size != self.members.len() {
            return Err(ParamsError::GroupSizeMismatch {
                group_size: self.group_size,
                members: self.members.len(),
            });
        }
        if self.num_tasks == 0 {
            return Err(ParamsError::NoTasks);
        }
        if self.num_devices_per_task.is_empty() {
            return Ok(());
        }
        if let Some(&task) = self.num_devices_per_task.keys().find(|&&t| t >= self.num_tasks) {
            return Err(ParamsError::TaskOutOfRange {
                task,
                num_tasks: self.num_tasks,
            });
        }
        if let Some((&task, _)) = self.num_devices_per_task.iter().find(|(_, &count)| count == 0) {
            return Err(ParamsError::EmptyTask { task });
        }
        let total = self
            .num_devices_per_task
            .values()
            .try_fold(0usize, |acc, &count| acc.checked_add(count))
            .unwrap_or(usize::MAX);
        if total != self.group_size {
            return Err(ParamsError::TaskDeviceCountMismatch {
                group_size: self.group_size,
                total,
            });
        }
        Ok(())
    }

    /// Device counts ordered by task index.
    ///
    /// Members are laid out task by task, so task `t` owns the ranks that
    /// follow the devices of tasks `0..t`. A single-task group with no explicit
    /// layout owns every member.
    pub fn devices_per_task(&self) -> Result<Vec<usize>, ParamsError> {
        if self.num_devices_per_task.is_empty() {
            if self.num_tasks == 1 {
                return Ok(vec![self.group_size]);
            }
            return Err(ParamsError::MissingTaskLayout {
                num_tasks: self.num_tasks,
            });
        }
        (0..self.num_tasks)
            .map(|task| match self.num_devices_per_task.get(&task) {
                Some(&count) if count > 0 => Ok(count),
                _ => Err(ParamsError::EmptyTask { task }),
            })
            .collect()
    }
}

impl fmt::Display for CollGroupParams {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "CollGroupParams {{group_key={} group_size={} device_type={} num_tasks={} runtime_details={} devices ",
            self.group_key, self.group_size, self.device_type, self.num_tasks, self.runtime_details
        )?;
        super::write_list(f, &self.members)?;
        f.write_str(" num_devices_per_task={")?;
        for (i, (task, count)) in self.num_devices_per_task.iter().enumerate() {
            if i > 0 {
                f.write_str(", ")?;
            }
            write!(f, "{}: {}", task, count)?;
        }
        f.write_str("}}")
    }
}

#[cfg(test)]
mod tests {
    use super::super::tests::group;
    use super::*;

    #[test]
    fn render_lists_members_and_task_counts() {
        let group = group(&["DeviceA", "DeviceB"], &[2]);
        let text = group.to_string();
        assert!(text.contains("DeviceA"));
        assert!(text.contains("DeviceB"));
        assert!(text.contains("0: 2"));
        assert_eq!(
            text,
            "CollGroupParams {group_key=1 group_size=2 device_type=GPU num_tasks=1 \
             runtime_details=CollGroupRuntimeDetails {communicator_key=comm-0} \
             devices {DeviceA,DeviceB} num_devices_per_task={0: 2}}"
        );
    }

    #[test]
    fn render_task_counts_in_task_order() {
        let mut group = group(&["a", "b", "c", "d", "e"], &[2, 3]);
        group.num_devices_per_task = [(1, 3), (0, 2)].into_iter().collect();
        assert!(group.to_string().ends_with("num_devices_per_task={0: 2, 1: 3}}"));
    }

    #[test]
    fn render_empty_group() {
        let group = CollGroupParams {
            group_key: 0,
            group_size: 0,
            device_type: DeviceType::new("CPU"),
            num_tasks: 1,
            runtime_details: Default::default(),
            members: Vec::new(),
            num_devices_per_task: BTreeMap::new(),
        };
        assert!(group
            .to_string()
            .ends_with("devices {} num_devices_per_task={}}"));
    }

    #[test]
    fn group_size_must_match_members() {
        let mut group = group(&["a", "b"], &[2]);
        group.group_size = 3;
        assert_eq!(
            group.validate(),
            Err(ParamsError::GroupSizeMismatch {
                group_size: 3,
                members: 2
            })
        );
    }

    #[test]
    fn task_counts_must_sum_to_group_size() {
        let mut group = group(&["a", "b", "c"], &[1, 2]);
        assert_eq!(group.validate(), Ok(()));
        group.num_devices_per_task.insert(1, 1);
        assert_eq!(
            group.validate(),
            Err(ParamsError::TaskDeviceCountMismatch {
                group_size: 3,
                total: 2
            })
        );
        group.num_devices_per_task.insert(2, 1);
        assert_eq!(
            group.validate(),
            Err(ParamsError::TaskOutOfRange {
                task: 2,
                num_tasks: 2
            })
        );
    }

    #[test]
    fn overflowing_task_counts_are_rejected() {
        let mut group = group(&["a", "b"], &[1, 1]);
        group.num_tasks = 3;
        group.num_devices_per_task = [(0, usize::MAX), (1, usize::MAX), (2, 2)]
            .into_iter()
            .collect();
        assert_eq!(
            group.validate(),
            Err(ParamsError::TaskDeviceCountMismatch {
                group_size: 2,
                total: usize::MAX
            })
        );
    }

    #[test]
    fn zero_device_task_is_rejected() {
        let mut group = group(&["a", "b", "c"], &[3, 0]);
        assert_eq!(group.validate(), Err(ParamsError::EmptyTask { task: 1 }));
        assert_eq!(group.devices_per_task(), Err(ParamsError::EmptyTask { task: 1 }));
        group.num_devices_per_task.remove(&1);
        group.num_tasks = 1;
        assert_eq!(group.validate(), Ok(()));
    }

    #[test]
    fn devices_per_task_layout() {
        let group = group(&["a", "b", "c"], &[1, 2]);
        assert_eq!(group.devices_per_task(), Ok(vec![1, 2]));

        let mut single = group.clone();
        single.num_tasks = 1;
        single.num_devices_per_task.clear();
        assert_eq!(single.devices_per_task(), Ok(vec![3]));

        let mut missing = group.clone();
        missing.num_devices_per_task.clear();
        assert_eq!(
            missing.devices_per_task(),
            Err(ParamsError::MissingTaskLayout { num_tasks: 2 })
        );

        let mut empty_task = group;
        empty_task.num_devices_per_task.insert(1, 0);
        assert_eq!(
            empty_task.devices_per_task(),
            Err(ParamsError::EmptyTask { task: 1 })
        );
    }

    #[test]
    fn parse_group_from_toml() {
        let group: CollGroupParams = toml::from_str(
            r#"
            group_key = 3
            group_size = 2
            device_type = "GPU"
            num_tasks = 2
            members = ["/task:0/gpu:0", "/task:1/gpu:0"]

            [runtime_details]
            communicator_key = "nccl-3"

            [num_devices_per_task]
            0 = 1
            1 = 1
            "#,
        )
        .unwrap();
        assert_eq!(group.members[1], Device::new("/task:1/gpu:0"));
        assert_eq!(group.runtime_details.communicator_key, "nccl-3");
        assert_eq!(group.devices_per_task(), Ok(vec![1, 1]));
        assert_eq!(group.validate(), Ok(()));
    }

    #[test]
    fn reject_non_integer_task_key() {
        let result: Result<CollGroupParams, _> = toml::from_str(
            r#"
            group_key = 3
            group_size = 0
            device_type = "GPU"

            [num_devices_per_task]
            first = 1
            "#,
        );
        assert!(result.is_err());
    }
}
