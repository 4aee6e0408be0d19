// Resource staging
//
// Before a component's native object is created, its bytes are laid out the
// way the backend wants to copy them (row pitch padded to the backend's
// alignment). Staging is pure CPU work, so batches of resources are staged
// in parallel on the job system and collected over a channel; the native
// uploads then happen on the calling thread.

use crate::error::{RenderError, RenderResult};
use crate::job::JobSystem;
use crate::render::resource::{Resource, ResourceKind};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StagedResource {
    bytes: Vec<u8>,
    row_pitch: usize,
    row_size: usize,
    rows: usize,
}

impl StagedResource {
    /// Lay out `resource` with every image row starting on a multiple of
    /// `row_alignment` bytes. Buffers are a single row.
    pub fn stage(resource: &Resource, row_alignment: usize) -> Self {
        let data = resource.data();
        match resource.kind() {
            ResourceKind::Buffer => Self {
                bytes: data.to_vec(),
                row_pitch: data.len(),
                row_size: data.len(),
                rows: 1,
            },
            ResourceKind::Image { format, dimensions } => {
                let row_size = dimensions.x as usize * format.pixel_size_bytes();
                let rows = dimensions.y as usize;
                let row_pitch = align_up(row_size, row_alignment.max(1));
                if row_pitch == row_size {
                    return Self {
                        bytes: data.to_vec(),
                        row_pitch,
                        row_size,
                        rows,
                    };
                }
                let mut bytes = vec![0u8; row_pitch * rows];
                for (src, dst) in data.chunks_exact(row_size).zip(bytes.chunks_exact_mut(row_pitch)) {
                    dst[..row_size].copy_from_slice(src);
                }
                Self {
                    bytes,
                    row_pitch,
                    row_size,
                    rows,
                }
            }
        }
    }

    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn row_pitch(&self) -> usize {
        self.row_pitch
    }

    /// Bytes of real data per row, without padding.
    pub fn row_size(&self) -> usize {
        self.row_size
    }

    pub fn rows(&self) -> usize {
        self.rows
    }

    /// Rows concatenated without padding.
    pub fn tight_bytes(&self) -> Vec<u8> {
        if self.row_pitch == self.row_size || self.row_size == 0 {
            return self.bytes.clone();
        }
        self.bytes
            .chunks_exact(self.row_pitch)
            .flat_map(|row| &row[..self.row_size])
            .copied()
            .collect()
    }
}

fn align_up(value: usize, alignment: usize) -> usize {
    value.div_ceil(alignment) * alignment
}

/// Stage every resource on the job system. The result keeps input order.
pub(crate) fn stage_all(
    jobs: &JobSystem,
    resources: Vec<Resource>,
    row_alignment: usize,
) -> RenderResult<Vec<(Resource, StagedResource)>> {
    let count = resources.len();
    let (tx, rx) = crossbeam_channel::unbounded();

    for (index, resource) in resources.into_iter().enumerate() {
        let tx = tx.clone();
        jobs.execute(move || {
            let staged = StagedResource::stage(&resource, row_alignment);
            // Receiver outlives every job: stage_all waits on the channel below.
            let _ = tx.send((index, resource, staged));
        });
    }
    drop(tx);

    // Ends once every job has dropped its sender, panicked jobs included.
    let mut slots: Vec<Option<(Resource, StagedResource)>> = (0..count).map(|_| None).collect();
    for (index, resource, staged) in rx.iter() {
        slots[index] = Some((resource, staged));
    }

    let staged: Vec<_> = slots.into_iter().flatten().collect();
    if staged.len() != count {
        log::error!("{} of {} resource uploads did not complete", count - staged.len(), count);
        return Err(RenderError::UploadFailed);
    }
    Ok(staged)
}

/// Same as `stage_all` without a job system.
pub(crate) fn stage_inline(resources: Vec<Resource>, row_alignment: usize) -> Vec<(Resource, StagedResource)> {
    resources
        .into_iter()
        .map(|resource| {
            let staged = StagedResource::stage(&resource, row_alignment);
            (resource, staged)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::render::format::ImageFormat;
    use crate::render::resource::ResourceAccess;
    use glam::UVec2;

    fn rgb_image() -> Resource {
        // 3x2 RGB: 9-byte rows.
        let data: Vec<u8> = (0..18).collect();
        Resource::image_from_memory(
            ImageFormat::Rgb24Unorm,
            UVec2::new(3, 2),
            data,
            ResourceAccess::StaticFixed,
        )
        .unwrap()
    }

    #[test]
    fn rows_are_padded_to_alignment() {
        let staged = StagedResource::stage(&rgb_image(), 4);
        assert_eq!(staged.row_pitch(), 12);
        assert_eq!(staged.row_size(), 9);
        assert_eq!(staged.bytes().len(), 24);
        assert_eq!(&staged.bytes()[12..21], &(9..18).collect::<Vec<u8>>()[..]);
        assert_eq!(staged.tight_bytes(), (0..18).collect::<Vec<u8>>());
    }

    #[test]
    fn tight_rows_are_copied_as_is() {
        let staged = StagedResource::stage(&rgb_image(), 1);
        assert_eq!(staged.row_pitch(), 9);
        assert_eq!(staged.bytes(), &(0..18).collect::<Vec<u8>>()[..]);
    }

    #[test]
    fn parallel_staging_keeps_order() {
        let jobs = JobSystem::new(3);
        let resources: Vec<_> = (0..32u8)
            .map(|i| Resource::from_bytes(vec![i; i as usize + 1], ResourceAccess::StaticFixed))
            .collect();
        let staged = stage_all(&jobs, resources, 4).unwrap();
        assert_eq!(staged.len(), 32);
        for (i, (resource, staged)) in staged.iter().enumerate() {
            assert_eq!(resource.size_bytes(), i + 1);
            assert_eq!(staged.bytes(), resource.data());
        }
    }
}
