use std::{
    fs,
    path::{Path, PathBuf},
};

use burn::data::dataset::Dataset;
use nifti::{IntoNdArray, NiftiObject, ReaderOptions};
use rand::Rng;
use tracing::{debug, error};

use crate::{
    data::{VolumeItem, parse_label},
    error::TrainError,
};

#[derive(Debug, Clone, PartialEq)]
pub struct ManifestEntry {
    pub path: PathBuf,
    pub label: usize,
}

/// Reads `<relative path> <label>` lines, resolving paths against `root`.
pub fn read_manifest(root: &Path, manifest: &Path) -> Result<Vec<ManifestEntry>, TrainError> {
    let text = fs::read_to_string(manifest).map_err(|err| TrainError::Manifest {
        path: manifest.to_path_buf(),
        line: 0,
        reason: err.to_string(),
    })?;

    let mut entries = Vec::new();
    for (index, line) in text.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let malformed = |reason: String| TrainError::Manifest {
            path: manifest.to_path_buf(),
            line: index + 1,
            reason,
        };

        let mut fields = line.split_whitespace();
        let (Some(file), Some(raw_label), None) = (fields.next(), fields.next(), fields.next())
        else {
            return Err(malformed(format!(
                "expected `<path> <label>`, found `{line}`"
            )));
        };
        let label =
            parse_label(raw_label).ok_or_else(|| malformed(format!("unknown label `{raw_label}`")))?;

        entries.push(ManifestEntry {
            path: root.join(file),
            label,
        });
    }

    Ok(entries)
}

/// Resize, optionally mirrored for augmentation. Intensity standardization
/// happens in the batcher.
#[derive(Debug, Clone)]
pub struct VolumeTransform {
    pub target_shape: [usize; 3],
    pub mirror: bool,
}

impl VolumeTransform {
    pub fn new(target_shape: [usize; 3]) -> Self {
        Self {
            target_shape,
            mirror: false,
        }
    }

    pub fn with_mirror(mut self, mirror: bool) -> Self {
        self.mirror = mirror;
        self
    }

    pub fn apply(&self, voxels: &[f32], shape: [usize; 3], rng: &mut impl Rng) -> Vec<f32> {
        let mut resized = resize_trilinear(voxels, shape, self.target_shape);
        if self.mirror && rng.gen_bool(0.5) {
            mirror_last_axis(&mut resized, self.target_shape);
        }
        resized
    }
}

/// Trilinear resampling with aligned corners.
pub fn resize_trilinear(voxels: &[f32], from: [usize; 3], to: [usize; 3]) -> Vec<f32> {
    if from == to {
        return voxels.to_vec();
    }
    let [fd, fh, fw] = from;
    let [td, th, tw] = to;
    let at = |z: usize, y: usize, x: usize| voxels[(z * fh + y) * fw + x];

    // Source coordinate, lower index and weight of the upper neighbour.
    let axis = |target: usize, source: usize| -> Vec<(usize, usize, f32)> {
        (0..target)
            .map(|i| {
                let pos = if target > 1 {
                    i as f32 * (source - 1) as f32 / (target - 1) as f32
                } else {
                    0.0
                };
                let lo = (pos.floor() as usize).min(source - 1);
                let hi = (lo + 1).min(source - 1);
                (lo, hi, pos - lo as f32)
            })
            .collect()
    };
    let (zs, ys, xs) = (axis(td, fd), axis(th, fh), axis(tw, fw));

    let mut out = Vec::with_capacity(td * th * tw);
    for &(z0, z1, wz) in &zs {
        for &(y0, y1, wy) in &ys {
            for &(x0, x1, wx) in &xs {
                let lerp = |a: f32, b: f32, w: f32| a + (b - a) * w;
                let c00 = lerp(at(z0, y0, x0), at(z0, y0, x1), wx);
                let c01 = lerp(at(z0, y1, x0), at(z0, y1, x1), wx);
                let c10 = lerp(at(z1, y0, x0), at(z1, y0, x1), wx);
                let c11 = lerp(at(z1, y1, x0), at(z1, y1, x1), wx);
                out.push(lerp(lerp(c00, c01, wy), lerp(c10, c11, wy), wz));
            }
        }
    }
    out
}

fn mirror_last_axis(voxels: &mut [f32], shape: [usize; 3]) {
    let width = shape[2];
    if width == 0 {
        return;
    }
    for row in voxels.chunks_mut(width) {
        row.reverse();
    }
}

/// Decodes a NIfTI file into row-major voxels and its three spatial dims.
pub fn read_volume(path: &Path) -> Result<(Vec<f32>, [usize; 3]), TrainError> {
    let failed = |reason: String| TrainError::Volume {
        path: path.to_path_buf(),
        reason,
    };

    let object = ReaderOptions::new()
        .read_file(path)
        .map_err(|err| failed(err.to_string()))?;
    let array = object
        .into_volume()
        .into_ndarray::<f32>()
        .map_err(|err| failed(err.to_string()))?;

    let shape = spatial_shape(array.shape()).ok_or_else(|| {
        failed(format!(
            "expected a non-empty 3-D volume, found shape {:?}",
            array.shape()
        ))
    })?;
    let voxels = array.iter().copied().collect();

    Ok((voxels, shape))
}

/// Drops trailing singleton axes (`[x, y, z, 1]` is common in NIfTI).
/// Volumes with an empty axis have nothing to resample and are rejected.
fn spatial_shape(dims: &[usize]) -> Option<[usize; 3]> {
    let mut dims = dims.to_vec();
    while dims.len() > 3 && dims.last() == Some(&1) {
        dims.pop();
    }
    match dims[..] {
        [d, h, w] if d > 0 && h > 0 && w > 0 => Some([d, h, w]),
        _ => None,
    }
}

/// Labeled volumes listed in a manifest, decoded lazily on every `get`.
pub struct VolumeDataset {
    entries: Vec<ManifestEntry>,
    transform: VolumeTransform,
}

impl VolumeDataset {
    pub fn new(
        image_root: impl AsRef<Path>,
        manifest: impl AsRef<Path>,
        transform: VolumeTransform,
    ) -> Result<Self, TrainError> {
        let entries = read_manifest(image_root.as_ref(), manifest.as_ref())?;
        debug!(
            "{} samples listed in {}",
            entries.len(),
            manifest.as_ref().display()
        );
        Ok(Self { entries, transform })
    }

    pub fn transform(&self) -> &VolumeTransform {
        &self.transform
    }

    pub fn load(&self, index: usize) -> Result<Option<VolumeItem>, TrainError> {
        let Some(entry) = self.entries.get(index) else {
            return Ok(None);
        };
        let (voxels, shape) = read_volume(&entry.path)?;
        let voxels = self
            .transform
            .apply(&voxels, shape, &mut rand::thread_rng());

        Ok(Some(VolumeItem {
            voxels,
            shape: self.transform.target_shape,
            label: entry.label,
        }))
    }
}

impl Dataset<VolumeItem> for VolumeDataset {
    fn get(&self, index: usize) -> Option<VolumeItem> {
        // The loader has no error channel; the missing item ends its iterator
        // and the trainer rejects the short epoch.
        self.load(index).unwrap_or_else(|err| {
            error!("{err}");
            None
        })
    }

    fn len(&self) -> usize {
        self.entries.len()
    }
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use approx::assert_abs_diff_eq;
    use rand::{SeedableRng, rngs::StdRng};

    use super::*;

    fn manifest_file(contents: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(contents.as_bytes()).unwrap();
        file
    }

    #[test]
    fn manifest_resolves_paths_and_labels() {
        let file = manifest_file("# subject label\nsub01.nii AD\n\nsub02.nii.gz 0\n");

        let entries = read_manifest(Path::new("/data/Image"), file.path()).unwrap();

        assert_eq!(
            entries,
            vec![
                ManifestEntry {
                    path: PathBuf::from("/data/Image/sub01.nii"),
                    label: 1
                },
                ManifestEntry {
                    path: PathBuf::from("/data/Image/sub02.nii.gz"),
                    label: 0
                },
            ]
        );
    }

    #[test]
    fn manifest_errors_name_the_line() {
        let file = manifest_file("sub01.nii AD\nsub02.nii\n");

        let err = read_manifest(Path::new("."), file.path()).unwrap_err();

        match err {
            TrainError::Manifest { line, .. } => assert_eq!(line, 2),
            other => panic!("unexpected error {other:?}"),
        }
    }

    #[test]
    fn manifest_rejects_unknown_labels() {
        let file = manifest_file("sub01.nii dementia\n");

        assert!(matches!(
            read_manifest(Path::new("."), file.path()),
            Err(TrainError::Manifest { line: 1, .. })
        ));
    }

    #[test]
    fn dataset_reports_manifest_length() {
        let file = manifest_file("a.nii AD\nb.nii MCI\nc.nii Normal\n");

        let dataset =
            VolumeDataset::new("/nonexistent", file.path(), VolumeTransform::new([4, 4, 4]))
                .unwrap();

        assert_eq!(dataset.len(), 3);
        assert!(matches!(dataset.load(3), Ok(None)));
        assert!(matches!(dataset.load(0), Err(TrainError::Volume { .. })));
    }

    #[test]
    fn trilinear_resize_interpolates_between_corners() {
        // Values equal the x coordinate, so resizing along x is linear.
        let voxels = vec![0.0, 1.0, 0.0, 1.0];

        let resized = resize_trilinear(&voxels, [1, 2, 2], [1, 2, 3]);

        assert_eq!(resized.len(), 6);
        for (got, want) in resized.iter().zip([0.0, 0.5, 1.0, 0.0, 0.5, 1.0]) {
            assert_abs_diff_eq!(*got, want, epsilon = 1e-6);
        }
    }

    #[test]
    fn resize_to_same_shape_is_identity() {
        let voxels: Vec<f32> = (0..8).map(|v| v as f32).collect();

        assert_eq!(resize_trilinear(&voxels, [2, 2, 2], [2, 2, 2]), voxels);
    }

    #[test]
    fn mirroring_reverses_rows_only() {
        let mut voxels = vec![1.0, 2.0, 3.0, 4.0, 5.0, 6.0];
        mirror_last_axis(&mut voxels, [1, 2, 3]);
        assert_eq!(voxels, vec![3.0, 2.0, 1.0, 6.0, 5.0, 4.0]);
    }

    #[test]
    fn transform_without_mirror_is_deterministic() {
        let transform = VolumeTransform::new([2, 2, 2]);
        let voxels: Vec<f32> = (0..27).map(|v| v as f32).collect();
        let mut rng = StdRng::seed_from_u64(0);

        let first = transform.apply(&voxels, [3, 3, 3], &mut rng);
        let second = transform.apply(&voxels, [3, 3, 3], &mut rng);

        assert_eq!(first.len(), 8);
        assert_eq!(first, second);
    }

    #[test]
    fn spatial_shape_drops_trailing_singletons() {
        assert_eq!(spatial_shape(&[4, 5, 6]), Some([4, 5, 6]));
        assert_eq!(spatial_shape(&[4, 5, 6, 1]), Some([4, 5, 6]));
        assert_eq!(spatial_shape(&[4, 5, 6, 2]), None);
        assert_eq!(spatial_shape(&[4, 5]), None);
        assert_eq!(spatial_shape(&[4, 0, 6]), None);
        assert_eq!(spatial_shape(&[0, 5, 6, 1]), None);
    }

    fn write_nifti(path: &Path, shape: (usize, usize, usize), voxels: Vec<f32>) {
        let array = ndarray::Array3::from_shape_vec(shape, voxels).unwrap();
        nifti::writer::WriterOptions::new(path)
            .write_nifti(&array)
            .unwrap();
    }

    #[test]
    fn nifti_volumes_decode_in_row_major_order() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("sub01.nii");
        let voxels: Vec<f32> = (0..24).map(|v| v as f32).collect();
        write_nifti(&path, (2, 3, 4), voxels.clone());

        let (decoded, shape) = read_volume(&path).unwrap();

        assert_eq!(shape, [2, 3, 4]);
        assert_eq!(decoded, voxels);
    }

    #[test]
    fn dataset_resizes_decoded_volumes() {
        let dir = tempfile::tempdir().unwrap();
        write_nifti(&dir.path().join("a.nii"), (3, 3, 3), vec![1.0; 27]);
        let manifest = manifest_file("a.nii MCI\n");

        let dataset =
            VolumeDataset::new(dir.path(), manifest.path(), VolumeTransform::new([2, 2, 2]))
                .unwrap();
        let item = dataset.get(0).unwrap();

        assert_eq!(item.shape, [2, 2, 2]);
        assert_eq!(item.voxels, vec![1.0; 8]);
        assert_eq!(item.label, 2);
    }

    #[test]
    fn mirror_augmentation_flips_some_samples() {
        let transform = VolumeTransform::new([1, 1, 3]).with_mirror(true);
        let voxels = vec![1.0, 2.0, 3.0];
        let mut rng = StdRng::seed_from_u64(7);

        let outputs: Vec<Vec<f32>> = (0..32)
            .map(|_| transform.apply(&voxels, [1, 1, 3], &mut rng))
            .collect();

        let flipped = outputs.iter().filter(|v| **v == [3.0, 2.0, 1.0]).count();
        let kept = outputs.iter().filter(|v| **v == [1.0, 2.0, 3.0]).count();
        assert_eq!(flipped + kept, 32);
        assert!(flipped > 0 && kept > 0);
    }

    #[test]
    fn mirror_is_off_unless_requested() {
        let transform = VolumeTransform::new([1, 1, 3]);
        let mut rng = StdRng::seed_from_u64(7);

        for _ in 0..32 {
            assert_eq!(
                transform.apply(&[1.0, 2.0, 3.0], [1, 1, 3], &mut rng),
                vec![1.0, 2.0, 3.0]
            );
        }
    }
}
