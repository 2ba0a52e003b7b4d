use std::sync::Arc;
use ash::vk;
use color_eyre::Result;
use futures::executor::{block_on, ThreadPool};
use futures::future::join_all;
use futures::task::SpawnExt;
use crate::renderer::core::frame::FRAMES_IN_FLIGHT;
use crate::renderer::vk::command_pool_builder::{allocate_command_buffers, CommandPoolBuilder};
use crate::renderer::vk::error::{VkError, VkResultExt};
use crate::renderer::vk::handle::DeviceHandle;

/// Splits `extent` into `count` vertical strips that cover every pixel exactly once.
/// Widths differ by at most one pixel; strips can be empty when `count` exceeds the width.
pub fn split_into_tiles(extent: vk::Extent2D, count: usize) -> Vec<vk::Rect2D> {
    let count = count.max(1) as u32;
    let base = extent.width / count;
    let remainder = extent.width % count;

    let mut x = 0;
    (0..count)
        .map(|i| {
            let width = base + u32::from(i < remainder);
            let rect = vk::Rect2D {
                offset: vk::Offset2D { x: x as i32, y: 0 },
                extent: vk::Extent2D { width, height: extent.height },
            };
            x += width;
            rect
        })
        .collect()
}

/// Color for a tile: hues spread evenly across tiles, slowly rotating over time
pub fn tile_color(index: usize, count: usize, seconds: f32) -> [f32; 4] {
    let hue = (index as f32 / count.max(1) as f32 + seconds * 0.1).rem_euclid(1.0);
    let [r, g, b] = hsv_to_rgb(hue, 0.6, 0.9);
    [r, g, b, 1.0]
}

fn hsv_to_rgb(h: f32, s: f32, v: f32) -> [f32; 3] {
    let sector = h * 6.0;
    let c = v * s;
    let x = c * (1.0 - (sector.rem_euclid(2.0) - 1.0).abs());
    let m = v - c;
    let (r, g, b) = match sector as u32 {
        0 => (c, x, 0.0),
        1 => (x, c, 0.0),
        2 => (0.0, c, x),
        3 => (0.0, x, c),
        4 => (x, 0.0, c),
        _ => (c, 0.0, x),
    };
    [r + m, g + m, b + m]
}

struct Worker {
    // One secondary command buffer per frame in flight, freed together with the pool
    command_buffers: Vec<vk::CommandBuffer>,
    _command_pool: DeviceHandle<vk::CommandPool>,
}

/// Records one secondary command buffer per tile on a thread pool.
///
/// Every worker owns its command pool, since a pool must never be used from two threads
/// at once. A call to `record` fans out one job per worker and joins them all before
/// returning, so no pool is ever touched by two jobs concurrently.
pub struct ParallelRecorder {
    thread_pool: ThreadPool,
    workers: Vec<Worker>,
    device: Arc<ash::Device>,
}

impl ParallelRecorder {
    pub fn new(
        device: &Arc<ash::Device>,
        queue_family_index: u32,
        threads: usize,
    ) -> Result<Self> {
        let threads = threads.max(1);
        let thread_pool = ThreadPool::builder()
            .pool_size(threads)
            .name_prefix("vkraii-recorder-")
            .create()?;

        let workers = (0..threads)
            .map(|_| {
                let command_pool = CommandPoolBuilder::new(queue_family_index)
                    .resettable()
                    .transient()
                    .build(device)?;
                let command_buffers = allocate_command_buffers(
                    device,
                    command_pool.handle(),
                    vk::CommandBufferLevel::SECONDARY,
                    FRAMES_IN_FLIGHT as u32,
                )?;
                Ok(Worker {
                    command_buffers,
                    _command_pool: command_pool,
                })
            })
            .collect::<Result<Vec<_>, VkError>>()?;

        log::info!("Recording secondary command buffers on {} threads", threads);

        Ok(Self {
            thread_pool,
            workers,
            device: device.clone(),
        })
    }

    /// Records the tiles for `frame_index` in parallel and returns the secondary command
    /// buffers in tile order, ready for `vkCmdExecuteCommands`.
    ///
    /// The caller must have waited for the fence of `frame_index`.
    pub fn record(
        &self,
        frame_index: usize,
        render_pass: vk::RenderPass,
        framebuffer: vk::Framebuffer,
        extent: vk::Extent2D,
        seconds: f32,
    ) -> Result<Vec<vk::CommandBuffer>> {
        let tiles = split_into_tiles(extent, self.workers.len());
        let count = tiles.len();

        let jobs = self.workers
            .iter()
            .zip(tiles)
            .enumerate()
            .map(|(i, (worker, tile))| {
                let device = self.device.clone();
                let command_buffer = worker.command_buffers[frame_index];
                let color = tile_color(i, count, seconds);
                self.thread_pool.spawn_with_handle(async move {
                    record_tile(&device, command_buffer, render_pass, framebuffer, tile, color)
                })
            })
            .collect::<Result<Vec<_>, _>>()?;

        block_on(join_all(jobs))
            .into_iter()
            .collect::<Result<Vec<()>, VkError>>()?;

        Ok(self.workers
            .iter()
            .map(|worker| worker.command_buffers[frame_index])
            .collect())
    }
}

fn record_tile(
    device: &ash::Device,
    command_buffer: vk::CommandBuffer,
    render_pass: vk::RenderPass,
    framebuffer: vk::Framebuffer,
    tile: vk::Rect2D,
    color: [f32; 4],
) -> Result<(), VkError> {
    let inheritance = vk::CommandBufferInheritanceInfo::default()
        .render_pass(render_pass)
        .subpass(0)
        .framebuffer(framebuffer);
    let begin_info = vk::CommandBufferBeginInfo::default()
        .flags(
            vk::CommandBufferUsageFlags::RENDER_PASS_CONTINUE
                | vk::CommandBufferUsageFlags::ONE_TIME_SUBMIT,
        )
        .inheritance_info(&inheritance);

    unsafe {
        device
            .reset_command_buffer(command_buffer, vk::CommandBufferResetFlags::empty())
            .context("vkResetCommandBuffer")?;
        device
            .begin_command_buffer(command_buffer, &begin_info)
            .context("vkBeginCommandBuffer")?;

        if tile.extent.width > 0 && tile.extent.height > 0 {
            let attachments = [vk::ClearAttachment {
                aspect_mask: vk::ImageAspectFlags::COLOR,
                color_attachment: 0,
                clear_value: vk::ClearValue {
                    color: vk::ClearColorValue { float32: color },
                },
            }];
            let rects = [vk::ClearRect {
                rect: tile,
                base_array_layer: 0,
                layer_count: 1,
            }];
            device.cmd_clear_attachments(command_buffer, &attachments, &rects);
        }

        device
            .end_command_buffer(command_buffer)
            .context("vkEndCommandBuffer")?;
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tiles_cover_width_exactly_once() {
        let extent = vk::Extent2D { width: 1283, height: 720 };
        let tiles = split_into_tiles(extent, 4);

        assert_eq!(tiles.len(), 4);
        let mut next_x = 0;
        for tile in &tiles {
            assert_eq!(tile.offset.x, next_x);
            assert_eq!(tile.offset.y, 0);
            assert_eq!(tile.extent.height, 720);
            next_x += tile.extent.width as i32;
        }
        assert_eq!(next_x, 1283);

        let widths = tiles.iter().map(|t| t.extent.width).collect::<Vec<_>>();
        assert_eq!(widths, vec![321, 321, 321, 320]);
    }

    #[test]
    fn more_tiles_than_pixels_gives_empty_tiles() {
        let tiles = split_into_tiles(vk::Extent2D { width: 2, height: 10 }, 4);
        let widths = tiles.iter().map(|t| t.extent.width).collect::<Vec<_>>();
        assert_eq!(widths, vec![1, 1, 0, 0]);
    }

    #[test]
    fn zero_count_is_one_tile() {
        let tiles = split_into_tiles(vk::Extent2D { width: 64, height: 64 }, 0);
        assert_eq!(tiles.len(), 1);
        assert_eq!(tiles[0].extent.width, 64);
    }

    #[test]
    fn tile_colors_are_opaque_and_in_range() {
        for i in 0..8 {
            let color = tile_color(i, 8, 12.5);
            assert_eq!(color[3], 1.0);
            assert!(color.iter().all(|c| (0.0..=1.0).contains(c)));
        }
    }

    #[test]
    fn neighbouring_tiles_differ() {
        assert_ne!(tile_color(0, 4, 0.0), tile_color(1, 4, 0.0));
    }

    #[test]
    fn pure_hues() {
        let red = hsv_to_rgb(0.0, 1.0, 1.0);
        assert!((red[0] - 1.0).abs() < 1e-6 && red[1].abs() < 1e-6 && red[2].abs() < 1e-6);

        let green = hsv_to_rgb(1.0 / 3.0, 1.0, 1.0);
        assert!((green[1] - 1.0).abs() < 1e-5 && green[0].abs() < 1e-5);
    }
}
