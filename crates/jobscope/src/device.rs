//! Placement descriptors: device tags, machine/device id ranges and hierarchies.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use smallvec::SmallVec;

use crate::error::{ScopeError, ScopeResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeviceTag {
    #[default]
    Cpu,
    #[serde(alias = "gpu")]
    Cuda,
}

impl DeviceTag {
    pub fn as_str(self) -> &'static str {
        match self {
            DeviceTag::Cpu => "cpu",
            DeviceTag::Cuda => "cuda",
        }
    }
}

impl fmt::Display for DeviceTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DeviceTag {
    type Err = ScopeError;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "cpu" => Ok(DeviceTag::Cpu),
            "cuda" | "gpu" => Ok(DeviceTag::Cuda),
            other => Err(ScopeError::placement(format!(
                "unknown device tag '{other}'"
            ))),
        }
    }
}

/// A contiguous run of devices on one machine, written `"m:d"` or `"m:first-last"`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct MachineDeviceIds {
    pub machine: u32,
    pub first_device: u32,
    pub last_device: u32,
}

impl MachineDeviceIds {
    pub fn single(machine: u32, device: u32) -> Self {
        Self {
            machine,
            first_device: device,
            last_device: device,
        }
    }

    pub fn range(machine: u32, first_device: u32, last_device: u32) -> ScopeResult<Self> {
        if last_device < first_device {
            return Err(ScopeError::placement(format!(
                "device range {first_device}-{last_device} on machine {machine} is reversed"
            )));
        }
        Ok(Self {
            machine,
            first_device,
            last_device,
        })
    }

    pub fn device_count(&self) -> u64 {
        u64::from(self.last_device.saturating_sub(self.first_device)) + 1
    }

    fn overlaps(&self, other: &MachineDeviceIds) -> bool {
        self.machine == other.machine
            && self.first_device <= other.last_device
            && other.first_device <= self.last_device
    }

    /// Parses a comma separated list such as `"0:0-3, 1:0-3"`.
    pub fn parse_list(raw: &str) -> ScopeResult<Vec<Self>> {
        raw.split(',')
            .map(str::trim)
            .filter(|part| !part.is_empty())
            .map(|part| part.parse::<MachineDeviceIds>())
            .collect()
    }
}

fn parse_index(raw: &str, what: &str, full: &str) -> ScopeResult<u32> {
    raw.trim().parse::<u32>().map_err(|_| {
        ScopeError::placement(format!("invalid {what} '{raw}' in machine/device id '{full}'"))
    })
}

impl FromStr for MachineDeviceIds {
    type Err = ScopeError;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        let (machine, devices) = raw.split_once(':').ok_or_else(|| {
            ScopeError::placement(format!("machine/device id '{raw}' is missing ':'"))
        })?;
        let machine = parse_index(machine, "machine id", raw)?;
        match devices.split_once('-') {
            Some((first, last)) => MachineDeviceIds::range(
                machine,
                parse_index(first, "device id", raw)?,
                parse_index(last, "device id", raw)?,
            ),
            None => Ok(MachineDeviceIds::single(
                machine,
                parse_index(devices, "device id", raw)?,
            )),
        }
    }
}

impl fmt::Display for MachineDeviceIds {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.first_device == self.last_device {
            write!(f, "{}:{}", self.machine, self.first_device)
        } else {
            write!(
                f,
                "{}:{}-{}",
                self.machine, self.first_device, self.last_device
            )
        }
    }
}

impl Serialize for MachineDeviceIds {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for MachineDeviceIds {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(serde::de::Error::custom)
    }
}

/// Nested device grouping used for distributed placement, e.g. `[2, 4]` for two groups of four.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "Vec<u64>", into = "Vec<u64>")]
pub struct Hierarchy(SmallVec<[u64; 4]>);

impl Hierarchy {
    pub fn new(dims: impl IntoIterator<Item = u64>) -> ScopeResult<Self> {
        let dims: SmallVec<[u64; 4]> = dims.into_iter().collect();
        if dims.is_empty() {
            return Err(ScopeError::placement("hierarchy must have at least one axis"));
        }
        if dims.contains(&0) {
            return Err(ScopeError::placement(format!(
                "hierarchy {:?} has a zero-sized axis",
                dims.as_slice()
            )));
        }
        if dims.iter().try_fold(1u64, |acc, &d| acc.checked_mul(d)).is_none() {
            return Err(ScopeError::placement(format!(
                "hierarchy {:?} covers more devices than fit in u64",
                dims.as_slice()
            )));
        }
        Ok(Self(dims))
    }

    pub fn dims(&self) -> &[u64] {
        &self.0
    }

    /// Product of the axes; `new` guarantees it does not overflow.
    pub fn parallel_num(&self) -> u64 {
        self.0.iter().product()
    }
}

impl TryFrom<Vec<u64>> for Hierarchy {
    type Error = ScopeError;

    fn try_from(dims: Vec<u64>) -> Result<Self, Self::Error> {
        Hierarchy::new(dims)
    }
}

impl From<Hierarchy> for Vec<u64> {
    fn from(hierarchy: Hierarchy) -> Self {
        hierarchy.0.into_vec()
    }
}

/// Where operations built under a scope are placed.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ParallelDesc {
    pub device_tag: DeviceTag,
    pub machine_device_ids: Vec<MachineDeviceIds>,
    #[serde(default)]
    pub hierarchy: Option<Hierarchy>,
}

impl ParallelDesc {
    pub fn new(
        device_tag: DeviceTag,
        machine_device_ids: Vec<MachineDeviceIds>,
        hierarchy: Option<Hierarchy>,
    ) -> ScopeResult<Self> {
        let desc = Self {
            device_tag,
            machine_device_ids,
            hierarchy,
        };
        desc.validate()?;
        Ok(desc)
    }

    pub fn device_count(&self) -> u64 {
        self.machine_device_ids
            .iter()
            .map(MachineDeviceIds::device_count)
            .sum()
    }

    pub fn parallel_num(&self) -> u64 {
        self.hierarchy
            .as_ref()
            .map(Hierarchy::parallel_num)
            .unwrap_or_else(|| self.device_count())
    }

    pub fn validate(&self) -> ScopeResult<()> {
        if self.machine_device_ids.is_empty() {
            return Err(ScopeError::placement("placement lists no machine/device ids"));
        }

        let mut by_machine: BTreeMap<u32, Vec<&MachineDeviceIds>> = BTreeMap::new();
        for ids in &self.machine_device_ids {
            if ids.last_device < ids.first_device {
                return Err(ScopeError::placement(format!(
                    "device range '{ids}' is reversed"
                )));
            }
            let seen = by_machine.entry(ids.machine).or_default();
            if let Some(clash) = seen.iter().find(|other| other.overlaps(ids)) {
                return Err(ScopeError::placement(format!(
                    "machine/device ids '{clash}' and '{ids}' overlap"
                )));
            }
            seen.push(ids);
        }

        if let Some(hierarchy) = &self.hierarchy {
            let devices = self.device_count();
            if hierarchy.parallel_num() != devices {
                return Err(ScopeError::placement(format!(
                    "hierarchy {:?} covers {} devices but placement lists {}",
                    hierarchy.dims(),
                    hierarchy.parallel_num(),
                    devices
                )));
            }
        }
        Ok(())
    }
}
