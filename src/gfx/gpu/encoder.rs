use std::collections::BTreeMap;

use crate::error::HalaRendererError;
use crate::gfx::command::{
  HalaCommand,
  HalaCommandBuffer,
  HalaIndirectCountInfo,
};
use crate::gfx::flags::{
  HalaBufferUsageFlags,
  HalaDescriptorType,
  HalaFormat,
};
use crate::gfx::kernel::HalaDescriptor;
use crate::gfx::resource::{
  HalaBufferHandle,
  HalaImageHandle,
  HalaImageViewHandle,
  HalaPipelineHandle,
};

use super::convert::{
  buffer_allocation_size,
  is_tightly_packed,
  HALA_GPU_INDEXED_RECORD_SIZE,
};
use super::{
  HalaGpuDevice,
  HalaGpuPipeline,
  HalaGpuPipelineKind,
  HalaRepackData,
};

const REPACK_LOCAL_SIZE: u32 = 64;

/// A draw recorded inside a rendering scope. Encoded when the scope ends.
struct HalaGpuDraw {
  pipeline: HalaPipelineHandle,
  bind_groups: Vec<wgpu::BindGroup>,
  index_buffer: HalaBufferHandle,
  info: HalaIndirectCountInfo,
}

struct HalaGpuRendering {
  depth_view: HalaImageViewHandle,
  clear_depth: Option<f32>,
  draws: Vec<HalaGpuDraw>,
}

#[derive(Default)]
struct HalaGpuState {
  compute_pipeline: Option<HalaPipelineHandle>,
  graphics_pipeline: Option<HalaPipelineHandle>,
  index_buffer: Option<HalaBufferHandle>,
  descriptors: BTreeMap<u32, HalaDescriptor>,
  push_constants: Vec<u8>,
  rendering: Option<HalaGpuRendering>,
}

/// The implementation of the command translation.
impl HalaGpuDevice {

  /// Translate a command recording into a wgpu command encoder.
  /// param command_buffer: The recording.
  /// return: The encoder, the dispatch count and the indirect draw count.
  pub(super) fn encode(
    &self,
    command_buffer: &HalaCommandBuffer,
  ) -> Result<(wgpu::CommandEncoder, u64, u64), HalaRendererError> {
    let mut encoder = self.device.create_command_encoder(&wgpu::CommandEncoderDescriptor {
      label: Some(&command_buffer.debug_name),
    });
    let mut state = HalaGpuState::default();
    let mut dispatches = 0;
    let mut draws = 0;

    for command in command_buffer.commands() {
      match command {
        HalaCommand::FillBuffer { buffer, offset, size, data } => {
          if *data != 0 {
            return Err(HalaRendererError::new("The GPU device only fills buffers with zero.", None));
          }
          encoder.clear_buffer(&self.buffer(*buffer)?.buffer, *offset, Some(*size));
        },
        HalaCommand::ClearImage { image, value } => self.encode_clear_image(&mut encoder, *image, *value)?,
        // wgpu orders passes by their resource usage.
        HalaCommand::PipelineBarrier { .. } => (),
        HalaCommand::BindComputePipeline(pipeline) => {
          match self.pipeline(*pipeline)?.kind {
            HalaGpuPipelineKind::Compute(_) => state.compute_pipeline = Some(*pipeline),
            HalaGpuPipelineKind::Graphics(_) => {
              return Err(HalaRendererError::new("A graphics pipeline is bound as a compute pipeline.", None));
            },
          }
        },
        HalaCommand::BindGraphicsPipeline(pipeline) => {
          match self.pipeline(*pipeline)?.kind {
            HalaGpuPipelineKind::Graphics(_) => state.graphics_pipeline = Some(*pipeline),
            HalaGpuPipelineKind::Compute(_) => {
              return Err(HalaRendererError::new("A compute pipeline is bound as a graphics pipeline.", None));
            },
          }
        },
        HalaCommand::BindIndexBuffer(buffer) => {
          let gpu_buffer = self.buffer(*buffer)?;
          if !gpu_buffer.desc.usage.contains(HalaBufferUsageFlags::INDEX_BUFFER) {
            return Err(HalaRendererError::new(
              &format!("The buffer \"{}\" is not an index buffer.", gpu_buffer.desc.debug_name),
              None,
            ));
          }
          state.index_buffer = Some(*buffer);
        },
        HalaCommand::PushDescriptors(descriptors) => {
          state.descriptors = descriptors.iter().copied().collect();
        },
        HalaCommand::PushConstants(data) => state.push_constants = data.clone(),
        HalaCommand::Dispatch(group_count) => {
          if state.rendering.is_some() {
            return Err(HalaRendererError::new("Dispatch inside a rendering scope.", None));
          }
          self.encode_dispatch(&mut encoder, &state, *group_count)?;
          dispatches += 1;
        },
        HalaCommand::BeginRendering { depth_view, clear_depth } => {
          if state.rendering.is_some() {
            return Err(HalaRendererError::new("Rendering scopes can not be nested.", None));
          }
          state.rendering = Some(HalaGpuRendering {
            depth_view: *depth_view,
            clear_depth: *clear_depth,
            draws: Vec::new(),
          });
        },
        HalaCommand::EndRendering => {
          let rendering = state.rendering.take()
            .ok_or(HalaRendererError::new("End rendering without a rendering scope.", None))?;
          draws += rendering.draws.len() as u64;
          self.encode_rendering(&mut encoder, rendering)?;
        },
        HalaCommand::DrawIndexedIndirectCount(info) => {
          let draw = self.prepare_draw(&state, info)?;
          state.rendering.as_mut()
            .ok_or(HalaRendererError::new("Draw outside a rendering scope.", None))?
            .draws.push(draw);
        },
        HalaCommand::DrawMeshTasksIndirectCount(_) => {
          return Err(HalaRendererError::new(
            &format!("The device \"{}\" has no mesh shaders.", self.name),
            None,
          ));
        },
      }
    }

    if state.rendering.is_some() {
      return Err(HalaRendererError::new(
        &format!("The command buffer \"{}\" ends inside a rendering scope.", command_buffer.debug_name),
        None,
      ));
    }
    Ok((encoder, dispatches, draws))
  }

  /// Create the bind groups of a pipeline from the pushed descriptors.
  fn create_bind_groups(
    &self,
    pipeline: &HalaGpuPipeline,
    descriptors: &BTreeMap<u32, HalaDescriptor>,
    push_constants: &[u8],
  ) -> Result<Vec<wgpu::BindGroup>, HalaRendererError> {
    let mut entries = Vec::with_capacity(pipeline.bindings.len());
    for binding in pipeline.bindings.iter() {
      let descriptor = descriptors.get(&binding.binding)
        .ok_or(HalaRendererError::new(
          &format!("The binding {} \"{}\" of \"{}\" is not pushed.", binding.binding, binding.name, pipeline.name),
          None,
        ))?;
      let resource = match (binding.descriptor_type, descriptor) {
        (HalaDescriptorType::StorageBuffer, HalaDescriptor::Buffer(buffer)) => {
          self.buffer(*buffer)?.buffer.as_entire_binding()
        },
        (HalaDescriptorType::SampledImage | HalaDescriptorType::StorageImage, HalaDescriptor::Image(view)) => {
          wgpu::BindingResource::TextureView(&self.image_view(*view)?.view)
        },
        _ => {
          return Err(HalaRendererError::new(
            &format!("The binding {} of \"{}\" has the wrong resource kind.", binding.binding, pipeline.name),
            None,
          ));
        },
      };
      entries.push(wgpu::BindGroupEntry {
        binding: binding.binding,
        resource,
      });
    }
    let layout = pipeline.layouts.first()
      .ok_or(HalaRendererError::new("The binding layout is none!", None))?;
    let mut bind_groups = vec![self.device.create_bind_group(&wgpu::BindGroupDescriptor {
      label: Some(&pipeline.name),
      layout,
      entries: &entries,
    })];
    if let Some(push_constant_group) = self.create_push_constant_group(pipeline, push_constants)? {
      bind_groups.push(push_constant_group);
    }
    Ok(bind_groups)
  }

  fn encode_dispatch(
    &self,
    encoder: &mut wgpu::CommandEncoder,
    state: &HalaGpuState,
    group_count: [u32; 3],
  ) -> Result<(), HalaRendererError> {
    let pipeline = self.pipeline(
      state.compute_pipeline.ok_or(HalaRendererError::new("Dispatch without a compute pipeline.", None))?,
    )?;
    let HalaGpuPipelineKind::Compute(compute_pipeline) = &pipeline.kind else {
      return Err(HalaRendererError::new("The bound compute pipeline is not a compute pipeline.", None));
    };
    let bind_groups = self.create_bind_groups(pipeline, &state.descriptors, &state.push_constants)?;

    let mut pass = encoder.begin_compute_pass(&wgpu::ComputePassDescriptor {
      label: Some(&pipeline.name),
      timestamp_writes: None,
    });
    pass.set_pipeline(compute_pipeline);
    for (index, bind_group) in bind_groups.iter().enumerate() {
      pass.set_bind_group(index as u32, bind_group, &[]);
    }
    pass.dispatch_workgroups(group_count[0], group_count[1], group_count[2]);
    Ok(())
  }

  /// Capture the bindings of a draw while the recording state still holds them.
  fn prepare_draw(
    &self,
    state: &HalaGpuState,
    info: &HalaIndirectCountInfo,
  ) -> Result<HalaGpuDraw, HalaRendererError> {
    let pipeline_handle = state.graphics_pipeline
      .ok_or(HalaRendererError::new("Draw without a graphics pipeline.", None))?;
    let index_buffer = state.index_buffer
      .ok_or(HalaRendererError::new("Indexed draw without an index buffer.", None))?;
    if info.stride < HALA_GPU_INDEXED_RECORD_SIZE as u32 || info.stride % 4 != 0 || info.offset % 4 != 0 || info.count_offset % 4 != 0 {
      return Err(HalaRendererError::new(
        &format!("The indirect layout [offset {}, stride {}] is not word aligned.", info.offset, info.stride),
        None,
      ));
    }
    let pipeline = self.pipeline(pipeline_handle)?;
    let bind_groups = self.create_bind_groups(pipeline, &state.descriptors, &state.push_constants)?;
    Ok(HalaGpuDraw {
      pipeline: pipeline_handle,
      bind_groups,
      index_buffer,
      info: *info,
    })
  }

  /// Copy strided draw records into a tightly packed scratch buffer.
  /// return: The scratch buffer, None if the records can be drawn in place.
  fn encode_repack(
    &self,
    encoder: &mut wgpu::CommandEncoder,
    info: &HalaIndirectCountInfo,
  ) -> Result<Option<wgpu::Buffer>, HalaRendererError> {
    if is_tightly_packed(info.offset, info.stride) {
      return Ok(None);
    }
    let packed = self.device.create_buffer(&wgpu::BufferDescriptor {
      label: Some("indirect_repack.destination"),
      size: buffer_allocation_size(info.max_draw_count as u64 * HALA_GPU_INDEXED_RECORD_SIZE),
      usage: wgpu::BufferUsages::STORAGE | wgpu::BufferUsages::INDIRECT,
      mapped_at_creation: false,
    });
    let data = HalaRepackData {
      source_offset: (info.offset / 4) as u32,
      source_stride: info.stride / 4,
      count_offset: (info.count_offset / 4) as u32,
      max_draw_count: info.max_draw_count,
    };
    let bind_group = self.device.create_bind_group(&wgpu::BindGroupDescriptor {
      label: Some("indirect_repack"),
      layout: &self.repack.layouts[0],
      entries: &[
        wgpu::BindGroupEntry { binding: 0, resource: self.buffer(info.buffer)?.buffer.as_entire_binding() },
        wgpu::BindGroupEntry { binding: 1, resource: self.buffer(info.count_buffer)?.buffer.as_entire_binding() },
        wgpu::BindGroupEntry { binding: 2, resource: packed.as_entire_binding() },
      ],
    });
    let push_constant_group = self.create_push_constant_group(&self.repack, bytemuck::bytes_of(&data))?
      .ok_or(HalaRendererError::new("The repack pass has no constants.", None))?;
    let HalaGpuPipelineKind::Compute(repack_pipeline) = &self.repack.kind else {
      return Err(HalaRendererError::new("The repack pipeline is not a compute pipeline.", None));
    };

    let mut pass = encoder.begin_compute_pass(&wgpu::ComputePassDescriptor {
      label: Some("indirect_repack"),
      timestamp_writes: None,
    });
    pass.set_pipeline(repack_pipeline);
    pass.set_bind_group(0, &bind_group, &[]);
    pass.set_bind_group(1, &push_constant_group, &[]);
    pass.dispatch_workgroups(info.max_draw_count.div_ceil(REPACK_LOCAL_SIZE), 1, 1);
    drop(pass);
    Ok(Some(packed))
  }

  fn encode_rendering(
    &self,
    encoder: &mut wgpu::CommandEncoder,
    rendering: HalaGpuRendering,
  ) -> Result<(), HalaRendererError> {
    // Render passes can not contain compute work, so repacks run first.
    let mut packed = Vec::with_capacity(rendering.draws.len());
    for draw in rendering.draws.iter() {
      packed.push(self.encode_repack(encoder, &draw.info)?);
    }

    let depth_view = &self.image_view(rendering.depth_view)?.view;
    let load = match rendering.clear_depth {
      Some(depth) => wgpu::LoadOp::Clear(depth),
      None => wgpu::LoadOp::Load,
    };
    let mut pass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
      label: Some("rendering"),
      color_attachments: &[],
      depth_stencil_attachment: Some(wgpu::RenderPassDepthStencilAttachment {
        view: depth_view,
        depth_ops: Some(wgpu::Operations {
          load,
          store: wgpu::StoreOp::Store,
        }),
        stencil_ops: None,
      }),
      timestamp_writes: None,
      occlusion_query_set: None,
    });
    for (draw, packed) in rendering.draws.iter().zip(packed.iter()) {
      if draw.info.max_draw_count == 0 {
        continue;
      }
      let pipeline = self.pipeline(draw.pipeline)?;
      let HalaGpuPipelineKind::Graphics(render_pipeline) = &pipeline.kind else {
        return Err(HalaRendererError::new("The bound graphics pipeline is not a graphics pipeline.", None));
      };
      pass.set_pipeline(render_pipeline);
      for (index, bind_group) in draw.bind_groups.iter().enumerate() {
        pass.set_bind_group(index as u32, bind_group, &[]);
      }
      pass.set_index_buffer(self.buffer(draw.index_buffer)?.buffer.slice(..), wgpu::IndexFormat::Uint32);
      let count_buffer = &self.buffer(draw.info.count_buffer)?.buffer;
      match packed {
        Some(packed) => pass.multi_draw_indexed_indirect_count(
          packed,
          0,
          count_buffer,
          draw.info.count_offset,
          draw.info.max_draw_count,
        ),
        None => pass.multi_draw_indexed_indirect_count(
          &self.buffer(draw.info.buffer)?.buffer,
          draw.info.offset,
          count_buffer,
          draw.info.count_offset,
          draw.info.max_draw_count,
        ),
      }
    }
    Ok(())
  }

  /// Clear every mip level of an image with a load op.
  fn encode_clear_image(
    &self,
    encoder: &mut wgpu::CommandEncoder,
    image: HalaImageHandle,
    value: f32,
  ) -> Result<(), HalaRendererError> {
    let gpu_image = self.image(image)?;
    for level in 0..gpu_image.desc.mip_levels {
      let view = gpu_image.texture.create_view(&wgpu::TextureViewDescriptor {
        label: Some(&gpu_image.desc.debug_name),
        base_mip_level: level,
        mip_level_count: Some(1),
        ..Default::default()
      });
      let (color_attachment, depth_stencil_attachment) = match gpu_image.desc.format {
        HalaFormat::R32Sfloat => (
          Some(wgpu::RenderPassColorAttachment {
            view: &view,
            resolve_target: None,
            ops: wgpu::Operations {
              load: wgpu::LoadOp::Clear(wgpu::Color { r: value as f64, g: 0.0, b: 0.0, a: 0.0 }),
              store: wgpu::StoreOp::Store,
            },
          }),
          None,
        ),
        HalaFormat::D32Sfloat => (
          None,
          Some(wgpu::RenderPassDepthStencilAttachment {
            view: &view,
            depth_ops: Some(wgpu::Operations {
              load: wgpu::LoadOp::Clear(value),
              store: wgpu::StoreOp::Store,
            }),
            stencil_ops: None,
          }),
        ),
      };
      let color_attachments = color_attachment.map(Some).into_iter().collect::<Vec<_>>();
      let _pass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
        label: Some("clear_image"),
        color_attachments: &color_attachments,
        depth_stencil_attachment,
        timestamp_writes: None,
        occlusion_query_set: None,
      });
    }
    Ok(())
  }

}
