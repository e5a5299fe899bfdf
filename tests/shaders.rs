use hala_cull::prelude::*;
use hala_cull::culling::{
  HalaCullData,
  HalaDepthReduceKernel,
  HalaDrawCullKernel,
  HalaDrawData,
  HalaIndexedDrawKernel,
  HalaMeshletDrawKernel,
};
use hala_cull::gfx::{
  HalaBindingDesc,
  HalaComputeKernel,
  HalaDescriptorType,
  HalaGraphicsKernel,
};
use hala_cull::scene::{HalaInstance, HalaMesh};

fn shader_module(source: &str) -> naga::Module {
  let module = naga::front::wgsl::parse_str(source).unwrap();
  naga::valid::Validator::new(naga::valid::ValidationFlags::all(), naga::valid::Capabilities::default())
    .validate(&module)
    .unwrap();
  module
}

fn type_size(module: &naga::Module, name: &str) -> usize {
  module.types.iter()
    .find(|(_, ty)| ty.name.as_deref() == Some(name))
    .map(|(_, ty)| ty.inner.size(module.to_ctx()) as usize)
    .unwrap()
}

/// Check the group 0 globals against the kernel bindings and the group 1 uniform against its push constants.
fn assert_layout(module: &naga::Module, bindings: &[HalaBindingDesc], push_constant_size: usize) {
  let mut globals = module.global_variables.iter()
    .filter_map(|(_, global)| global.binding.as_ref().map(|binding| (binding.group, binding.binding, global)))
    .collect::<Vec<_>>();
  globals.sort_by_key(|(group, binding, _)| (*group, *binding));

  let group0 = globals.iter().filter(|(group, _, _)| *group == 0).collect::<Vec<_>>();
  assert_eq!(group0.len(), bindings.len());
  for ((_, binding, global), desc) in group0.iter().zip(bindings) {
    assert_eq!(*binding, desc.binding, "binding of \"{}\"", desc.name);
    assert_eq!(global.name.as_deref(), Some(desc.name));
    match desc.descriptor_type {
      HalaDescriptorType::StorageBuffer => match global.space {
        naga::AddressSpace::Storage { access } => {
          assert_eq!(access.contains(naga::StorageAccess::STORE), desc.writable, "access of \"{}\"", desc.name);
        },
        space => panic!("\"{}\" lives in {:?}", desc.name, space),
      },
      HalaDescriptorType::SampledImage => assert!(matches!(
        module.types[global.ty].inner,
        naga::TypeInner::Image { class: naga::ImageClass::Sampled { .. }, .. },
      )),
      HalaDescriptorType::StorageImage => assert!(matches!(
        module.types[global.ty].inner,
        naga::TypeInner::Image { class: naga::ImageClass::Storage { .. }, .. },
      )),
    }
  }

  let uniforms = globals.iter().filter(|(group, _, _)| *group == 1).collect::<Vec<_>>();
  assert_eq!(uniforms.len(), 1);
  let (_, binding, uniform) = uniforms[0];
  assert_eq!(*binding, 0);
  assert_eq!(uniform.space, naga::AddressSpace::Uniform);
  assert_eq!(module.types[uniform.ty].inner.size(module.to_ctx()) as usize, push_constant_size);
}

fn assert_compute_kernel(kernel: &dyn HalaComputeKernel) -> naga::Module {
  let module = shader_module(kernel.shader_source().unwrap());
  assert_layout(&module, kernel.bindings(), kernel.push_constant_size());
  let entry_point = module.entry_points.iter().find(|entry_point| entry_point.name == "main").unwrap();
  assert_eq!(entry_point.stage, naga::ShaderStage::Compute);
  let [x, y] = kernel.local_size();
  assert_eq!(entry_point.workgroup_size, [x, y, 1]);
  module
}

#[test]
fn cull_shader_matches_the_kernel() {
  let module = assert_compute_kernel(&HalaDrawCullKernel);
  assert_eq!(type_size(&module, "Instance"), std::mem::size_of::<HalaInstance>());
  assert_eq!(type_size(&module, "Mesh"), std::mem::size_of::<HalaMesh>());
  assert_eq!(type_size(&module, "DrawCommand"), std::mem::size_of::<HalaDrawCommand>());
  assert_eq!(type_size(&module, "CullData"), std::mem::size_of::<HalaCullData>());
}

#[test]
fn reduce_shader_matches_the_kernel() {
  assert_compute_kernel(&HalaDepthReduceKernel);
}

#[test]
fn indexed_draw_shader_matches_the_kernel() {
  let kernel = HalaIndexedDrawKernel;
  let module = shader_module(kernel.shader_source().unwrap());
  assert_layout(&module, kernel.bindings(), kernel.push_constant_size());
  let entry_point = module.entry_points.iter().find(|entry_point| entry_point.name == "vs_main").unwrap();
  assert_eq!(entry_point.stage, naga::ShaderStage::Vertex);
  assert_eq!(type_size(&module, "Instance"), std::mem::size_of::<HalaInstance>());
  assert_eq!(type_size(&module, "DrawData"), std::mem::size_of::<HalaDrawData>());
}

#[test]
fn meshlet_draws_stay_on_the_software_device() {
  let kernel = HalaMeshletDrawKernel;
  assert!(kernel.shader_source().is_none());
  assert_eq!(kernel.draw_kind(), hala_cull::gfx::HalaDrawKind::MeshTasks);
}
