//! Core affinity classes and CPU topology.
//!
//! Workers are tagged with a [`CoreClass`]. On heterogeneous machines the
//! first workers serve efficiency cores and the rest performance cores; on
//! homogeneous machines every worker is [`CoreClass::Uniform`] and affinity
//! only influences lane selection.

use std::fmt;
use std::thread;

/// Where an actor wants to be scheduled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[repr(u8)]
pub enum CoreAffinity {
    PreferEfficiency = 0,
    #[default]
    PreferPerformance = 1,
    OnlyEfficiency = 2,
    OnlyPerformance = 3,
}

impl CoreAffinity {
    pub(crate) fn from_u8(raw: u8) -> Self {
        match raw {
            0 => Self::PreferEfficiency,
            2 => Self::OnlyEfficiency,
            3 => Self::OnlyPerformance,
            _ => Self::PreferPerformance,
        }
    }

    /// `Only*` affinities never run on the other class.
    pub fn is_exclusive(self) -> bool {
        matches!(self, Self::OnlyEfficiency | Self::OnlyPerformance)
    }

    /// The class this affinity points at.
    pub fn target_class(self) -> CoreClass {
        match self {
            Self::PreferEfficiency | Self::OnlyEfficiency => CoreClass::Efficiency,
            Self::PreferPerformance | Self::OnlyPerformance => CoreClass::Performance,
        }
    }

    /// Whether a worker of `class` may run an actor with this affinity.
    pub fn allows(self, class: CoreClass) -> bool {
        match class {
            CoreClass::Uniform => true,
            class => !self.is_exclusive() || self.target_class() == class,
        }
    }

    pub(crate) fn lane(self) -> usize {
        self as usize
    }
}

/// The kind of core a worker thread stands for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CoreClass {
    Efficiency,
    Performance,
    /// Serves every affinity; used when no efficiency/performance split is known.
    Uniform,
}

impl CoreClass {
    pub(crate) const COUNT: usize = 3;

    pub(crate) fn index(self) -> usize {
        match self {
            Self::Efficiency => 0,
            Self::Performance => 1,
            Self::Uniform => 2,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Self::Efficiency => "efficiency",
            Self::Performance => "performance",
            Self::Uniform => "uniform",
        }
    }

    /// Ready lanes this class drains first, then lanes it may take work from
    /// when its own are empty.
    pub(crate) fn lanes(self) -> (&'static [CoreAffinity], &'static [CoreAffinity]) {
        use CoreAffinity::*;
        match self {
            Self::Efficiency => (&[OnlyEfficiency, PreferEfficiency], &[PreferPerformance]),
            Self::Performance => (&[OnlyPerformance, PreferPerformance], &[PreferEfficiency]),
            Self::Uniform => (
                &[OnlyPerformance, OnlyEfficiency, PreferPerformance, PreferEfficiency],
                &[],
            ),
        }
    }
}

impl fmt::Display for CoreClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Efficiency/performance core counts of the host.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CoreTopology {
    pub total: usize,
    pub efficiency: usize,
    pub performance: usize,
    pub heterogeneous: bool,
}

impl CoreTopology {
    /// Probe the host. Falls back to a uniform topology when the platform
    /// does not expose per-core capacity.
    pub fn detect() -> Self {
        let total = thread::available_parallelism()
            .map(std::num::NonZeroUsize::get)
            .unwrap_or(4);

        match read_capacities(total).and_then(|caps| classify_capacities(&caps)) {
            Some(efficiency) => Self::split(total, efficiency),
            None => Self::uniform(total),
        }
    }

    pub fn uniform(total: usize) -> Self {
        Self {
            total,
            efficiency: 0,
            performance: total,
            heterogeneous: false,
        }
    }

    /// A topology with `efficiency` slow cores out of `total`. Zero
    /// efficiency cores (or a single core) yields a uniform topology.
    pub fn split(total: usize, efficiency: usize) -> Self {
        if efficiency == 0 || total < 2 {
            return Self::uniform(total);
        }
        let efficiency = efficiency.min(total - 1);
        Self {
            total,
            efficiency,
            performance: total - efficiency,
            heterogeneous: true,
        }
    }

    /// Assign a class to each of `workers` threads, efficiency first.
    pub fn worker_classes(&self, workers: usize) -> Vec<CoreClass> {
        if !self.heterogeneous || workers < 2 {
            return vec![CoreClass::Uniform; workers];
        }

        let scaled = if workers == self.total {
            self.efficiency
        } else {
            (self.efficiency * workers + self.total / 2) / self.total
        };
        let efficiency_workers = scaled.clamp(1, workers - 1);

        (0..workers)
            .map(|i| {
                if i < efficiency_workers {
                    CoreClass::Efficiency
                } else {
                    CoreClass::Performance
                }
            })
            .collect()
    }
}

/// Number of cores below the maximum capacity, if capacities differ.
fn classify_capacities(capacities: &[u32]) -> Option<usize> {
    let max = *capacities.iter().max()?;
    let min = *capacities.iter().min()?;
    if min == max {
        return None;
    }
    Some(capacities.iter().filter(|&&c| c < max).count())
}

#[cfg(target_os = "linux")]
fn read_capacities(total: usize) -> Option<Vec<u32>> {
    (0..total)
        .map(|cpu| {
            let path = format!("/sys/devices/system/cpu/cpu{cpu}/cpu_capacity");
            std::fs::read_to_string(path).ok()?.trim().parse().ok()
        })
        .collect()
}

#[cfg(not(target_os = "linux"))]
fn read_capacities(_total: usize) -> Option<Vec<u32>> {
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exclusive_affinity_compatibility() {
        use CoreAffinity::*;
        assert!(OnlyPerformance.allows(CoreClass::Performance));
        assert!(!OnlyPerformance.allows(CoreClass::Efficiency));
        assert!(OnlyPerformance.allows(CoreClass::Uniform));
        assert!(!OnlyEfficiency.allows(CoreClass::Performance));
        assert!(PreferEfficiency.allows(CoreClass::Performance));
        assert!(PreferPerformance.allows(CoreClass::Efficiency));
    }

    #[test]
    fn test_raw_round_trip() {
        for affinity in [
            CoreAffinity::PreferEfficiency,
            CoreAffinity::PreferPerformance,
            CoreAffinity::OnlyEfficiency,
            CoreAffinity::OnlyPerformance,
        ] {
            assert_eq!(CoreAffinity::from_u8(affinity as u8), affinity);
        }
    }

    #[test]
    fn test_lanes_never_include_foreign_exclusive() {
        for class in [CoreClass::Efficiency, CoreClass::Performance, CoreClass::Uniform] {
            let (primary, secondary) = class.lanes();
            for affinity in primary.iter().chain(secondary) {
                assert!(affinity.allows(class), "{class} must not drain {affinity:?}");
            }
        }
    }

    #[test]
    fn test_uniform_topology_has_uniform_workers() {
        let topology = CoreTopology::uniform(8);
        assert!(topology
            .worker_classes(6)
            .iter()
            .all(|c| *c == CoreClass::Uniform));
    }

    #[test]
    fn test_split_assigns_efficiency_first() {
        let topology = CoreTopology::split(6, 2);
        let classes = topology.worker_classes(6);
        assert_eq!(
            classes,
            vec![
                CoreClass::Efficiency,
                CoreClass::Efficiency,
                CoreClass::Performance,
                CoreClass::Performance,
                CoreClass::Performance,
                CoreClass::Performance,
            ]
        );
    }

    #[test]
    fn test_split_scales_to_worker_count() {
        let topology = CoreTopology::split(8, 4);
        let classes = topology.worker_classes(4);
        assert_eq!(classes.iter().filter(|c| **c == CoreClass::Efficiency).count(), 2);

        // Always at least one worker of each class.
        let lopsided = CoreTopology::split(10, 9).worker_classes(2);
        assert_eq!(lopsided, vec![CoreClass::Efficiency, CoreClass::Performance]);
    }

    #[test]
    fn test_classify_capacities() {
        assert_eq!(classify_capacities(&[1024, 1024, 1024]), None);
        assert_eq!(classify_capacities(&[446, 446, 1024, 1024, 1024]), Some(2));
        assert_eq!(classify_capacities(&[]), None);
    }
}
