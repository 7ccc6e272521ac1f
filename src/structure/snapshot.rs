//! Read-only structural snapshot of an experiment.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::BTreeSet;

use super::ExperimentId;

/// A point-in-time view of an experiment's plates, acquisitions,
/// wells, sites and channels.
///
/// Planning only ever reads from a snapshot. Accessors return entities in
/// their intrinsic creation order so that planning is deterministic no
/// matter how the structural store happened to serialize them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StructuralSnapshot {
    /// Experiment identifier.
    pub experiment_id: ExperimentId,

    /// Experiment display name.
    #[serde(default)]
    pub name: String,

    /// Microscope type the images were acquired with.
    #[serde(default = "default_microscope")]
    pub microscope_type: String,

    /// Plates of the experiment.
    #[serde(default)]
    pub plates: Vec<Plate>,

    /// Channels of the experiment.
    #[serde(default)]
    pub channels: Vec<Channel>,
}

fn default_microscope() -> String {
    "default".to_string()
}

/// A plate and its acquisitions.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Plate {
    pub name: String,
    #[serde(default)]
    pub acquisitions: Vec<Acquisition>,
}

/// One imaging run of a plate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Acquisition {
    /// Id assigned by the structural store; increases in creation order.
    pub id: u64,
    pub name: String,
    /// Time point (cycle) this acquisition belongs to.
    #[serde(default)]
    pub tpoint: u32,
    /// Microscope metadata files, relative to the experiment location.
    #[serde(default)]
    pub metadata_files: Vec<String>,
    /// Microscope image files, relative to the experiment location.
    #[serde(default)]
    pub images: Vec<ImageFile>,
}

/// A single microscope image plane and where it belongs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageFile {
    pub file: String,
    pub well: String,
    pub site: u32,
    pub channel: u32,
    #[serde(default)]
    pub zplane: u32,
}

/// An imaging channel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Channel {
    pub index: u32,
    pub name: String,
}

/// An acquisition together with the plate it belongs to.
#[derive(Debug, Clone, Copy)]
pub struct AcquisitionRef<'a> {
    pub plate: &'a Plate,
    pub acquisition: &'a Acquisition,
}

impl StructuralSnapshot {
    /// Create an empty snapshot for an experiment.
    pub fn new(experiment_id: impl Into<ExperimentId>, name: impl Into<String>) -> Self {
        Self {
            experiment_id: experiment_id.into(),
            name: name.into(),
            microscope_type: default_microscope(),
            plates: Vec::new(),
            channels: Vec::new(),
        }
    }

    /// All acquisitions ordered by creation order (store id).
    pub fn acquisitions(&self) -> Vec<AcquisitionRef<'_>> {
        let mut refs: Vec<AcquisitionRef<'_>> = self
            .plates
            .iter()
            .flat_map(|plate| {
                plate
                    .acquisitions
                    .iter()
                    .map(move |acquisition| AcquisitionRef { plate, acquisition })
            })
            .collect();
        refs.sort_by_key(|r| r.acquisition.id);
        refs
    }

    /// Channels ordered by index.
    pub fn channels(&self) -> Vec<&Channel> {
        let mut channels: Vec<&Channel> = self.channels.iter().collect();
        channels.sort_by_key(|c| c.index);
        channels
    }

    /// Look up a channel by index.
    pub fn channel(&self, index: u32) -> Option<&Channel> {
        self.channels.iter().find(|c| c.index == index)
    }

    /// Total number of image files across all acquisitions.
    pub fn image_count(&self) -> usize {
        self.plates
            .iter()
            .flat_map(|p| &p.acquisitions)
            .map(|a| a.images.len())
            .sum()
    }

    /// SHA-256 over the canonical JSON form of the snapshot.
    ///
    /// Two snapshots with the same fingerprint produce the same plan; the
    /// order entities were listed in does not change it.
    pub fn fingerprint(&self) -> String {
        let canonical = serde_json::to_vec(&self.canonical()).unwrap_or_default();
        let hash = Sha256::digest(&canonical);
        hex::encode(&hash[..16])
    }

    /// Copy with plates sorted by name, acquisitions by id, images in
    /// [`Acquisition::ordered_images`] order and channels by index.
    fn canonical(&self) -> Self {
        let mut snap = self.clone();
        snap.channels.sort_by_key(|c| c.index);
        snap.plates.sort_by(|a, b| a.name.cmp(&b.name));
        for plate in &mut snap.plates {
            plate.acquisitions.sort_by_key(|a| a.id);
            for acquisition in &mut plate.acquisitions {
                acquisition.metadata_files.sort();
                acquisition.images.sort_by(|a, b| {
                    (a.well.as_str(), a.site, a.channel, a.zplane, a.file.as_str()).cmp(&(
                        b.well.as_str(),
                        b.site,
                        b.channel,
                        b.zplane,
                        b.file.as_str(),
                    ))
                });
            }
        }
        snap
    }
}

impl Acquisition {
    /// Images ordered by well, site, channel and z-plane.
    pub fn ordered_images(&self) -> Vec<&ImageFile> {
        let mut images: Vec<&ImageFile> = self.images.iter().collect();
        images.sort_by(|a, b| {
            (a.well.as_str(), a.site, a.channel, a.zplane)
                .cmp(&(b.well.as_str(), b.site, b.channel, b.zplane))
        });
        images
    }

    /// Images of a single channel, in [`Acquisition::ordered_images`] order.
    pub fn channel_images(&self, channel: u32) -> Vec<&ImageFile> {
        self.ordered_images()
            .into_iter()
            .filter(|i| i.channel == channel)
            .collect()
    }

    /// Distinct well names in sorted order.
    pub fn wells(&self) -> Vec<&str> {
        let wells: BTreeSet<&str> = self.images.iter().map(|i| i.well.as_str()).collect();
        wells.into_iter().collect()
    }

    /// Distinct site indices imaged in a well, sorted.
    pub fn sites(&self, well: &str) -> Vec<u32> {
        let sites: BTreeSet<u32> = self
            .images
            .iter()
            .filter(|i| i.well == well)
            .map(|i| i.site)
            .collect();
        sites.into_iter().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn image(well: &str, site: u32, channel: u32) -> ImageFile {
        ImageFile {
            file: format!("{}_s{}_c{}.tif", well, site, channel),
            well: well.to_string(),
            site,
            channel,
            zplane: 0,
        }
    }

    fn snapshot() -> StructuralSnapshot {
        let mut snap = StructuralSnapshot::new(3, "screen");
        snap.channels = vec![
            Channel {
                index: 1,
                name: "GFP".into(),
            },
            Channel {
                index: 0,
                name: "DAPI".into(),
            },
        ];
        snap.plates = vec![Plate {
            name: "plate01".into(),
            acquisitions: vec![
                Acquisition {
                    id: 9,
                    name: "second".into(),
                    tpoint: 1,
                    metadata_files: vec![],
                    images: vec![image("B02", 0, 0)],
                },
                Acquisition {
                    id: 4,
                    name: "first".into(),
                    tpoint: 0,
                    metadata_files: vec![],
                    images: vec![image("B02", 1, 1), image("A01", 0, 0), image("B02", 0, 1)],
                },
            ],
        }];
        snap
    }

    #[test]
    fn acquisitions_follow_creation_order() {
        let snap = snapshot();
        let names: Vec<&str> = snap
            .acquisitions()
            .iter()
            .map(|r| r.acquisition.name.as_str())
            .collect();
        assert_eq!(names, vec!["first", "second"]);
    }

    #[test]
    fn channels_sorted_by_index() {
        let snap = snapshot();
        let names: Vec<&str> = snap.channels().iter().map(|c| c.name.as_str()).collect();
        assert_eq!(names, vec!["DAPI", "GFP"]);
    }

    #[test]
    fn images_ordered_by_well_then_site() {
        let snap = snapshot();
        let first = snap.acquisitions()[0].acquisition;
        let files: Vec<&str> = first.ordered_images().iter().map(|i| i.file.as_str()).collect();
        assert_eq!(files, vec!["A01_s0_c0.tif", "B02_s0_c1.tif", "B02_s1_c1.tif"]);
        assert_eq!(first.wells(), vec!["A01", "B02"]);
        assert_eq!(first.sites("B02"), vec![0, 1]);
    }

    #[test]
    fn fingerprint_is_stable_and_sensitive() {
        let a = snapshot();
        let b = snapshot();
        assert_eq!(a.fingerprint(), b.fingerprint());

        let mut c = snapshot();
        c.channels.pop();
        assert_ne!(a.fingerprint(), c.fingerprint());
    }

    #[test]
    fn fingerprint_ignores_listing_order() {
        let a = snapshot();
        let mut b = snapshot();
        b.channels.reverse();
        b.plates[0].acquisitions.reverse();
        b.plates[0].acquisitions[0].images.reverse();
        b.plates.push(Plate {
            name: "plate00".into(),
            acquisitions: vec![],
        });
        let mut c = a.clone();
        c.plates.insert(
            0,
            Plate {
                name: "plate00".into(),
                acquisitions: vec![],
            },
        );

        assert_eq!(b.fingerprint(), c.fingerprint());
        assert_ne!(a.fingerprint(), c.fingerprint());

        let mut renamed = c.clone();
        renamed.plates[1].acquisitions[0].images[0].file = "other.tif".into();
        assert_ne!(renamed.fingerprint(), c.fingerprint());
    }

    #[test]
    fn image_count_sums_acquisitions() {
        assert_eq!(snapshot().image_count(), 4);
    }
}
