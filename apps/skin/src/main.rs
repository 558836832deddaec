mod demo;

use canopy::{prelude::*, vulkan::*};
use spark::vk;
use std::{path::PathBuf, sync::Arc};
use structopt::StructOpt;
use strum::VariantNames;
use tracing::{debug, info, warn};

fn try_version_from_str(s: &str) -> Result<vk::Version, String> {
    let mut parts = s.split('.').map(|part| part.parse::<u32>());
    match (parts.next(), parts.next(), parts.next()) {
        (Some(Ok(major)), Some(Ok(minor)), None) => Ok(vk::Version::from_raw_parts(major, minor, 0)),
        _ => Err(format!("expected <major>.<minor>, got \"{}\"", s)),
    }
}

#[derive(Debug, StructOpt)]
#[structopt(no_version)]
struct AppParams {
    /// Core Vulkan version to load
    #[structopt(short, long, parse(try_from_str=try_version_from_str), default_value="1.1")]
    version: vk::Version,

    /// Whether to use KHR_acceleration_structure
    #[structopt(long, possible_values=&ContextFeature::VARIANTS, default_value="optional")]
    ray_tracing: ContextFeature,

    /// Forward validation messages to the log
    #[structopt(short, long)]
    debug: bool,

    /// Number of frames to run
    #[structopt(short, long, default_value = "120")]
    frames: u32,

    /// Seconds to advance the animation each frame
    #[structopt(long, default_value = "0.0166667")]
    frame_time: f32,

    /// When to upload new geometry reference tables
    #[structopt(long, possible_values=&ReferenceRefresh::VARIANTS, default_value="every-frame")]
    reference_refresh: ReferenceRefresh,

    /// Keep bottom level structures of static meshes between frames
    #[structopt(long)]
    reuse_static: bool,

    /// The compiled skinning kernel
    #[structopt(long, default_value = "canopy/shaders/skin.comp.spv")]
    shader: PathBuf,
}

fn skin_only(device: &SharedDevice, app_params: &AppParams, scene: demo::Scene) -> Result<()> {
    let mut pass = AnimationPass::builder(device)
        .shader(&app_params.shader)
        .scene(&scene.root)
        .build()?;
    let mut animator = scene.animator;
    for _ in 0..app_params.frames {
        animator.update(app_params.frame_time);
        pass.process(animator.final_bone_matrices())?;
    }
    info!(frames = app_params.frames, meshes = pass.mesh_count(), "skinned without acceleration structures");
    Ok(())
}

fn main() -> color_eyre::Result<()> {
    color_eyre::install()?;
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let app_params = AppParams::from_args();
    let context_params = ContextParams {
        version: app_params.version,
        is_debug: app_params.debug,
        ray_tracing: app_params.ray_tracing,
    };
    let vulkan_device = Arc::new(VulkanDevice::new(&context_params)?);
    let supports_acceleration_structures = vulkan_device.supports_acceleration_structures();
    let device: SharedDevice = vulkan_device;

    let scene = demo::create_scene(&device)?;
    info!(
        nodes = scene.root.iter_depth_first().count(),
        leaves = scene.root.leaf_count(),
        bones = scene.animator.skeleton().len(),
        "created scene"
    );

    if !supports_acceleration_structures {
        warn!("acceleration structures are not available, running the skinning pass only");
        skin_only(&device, &app_params, scene)?;
        return Ok(());
    }

    let params = SceneAccelParams {
        build: BuildParams {
            reuse_static_bottom_level: app_params.reuse_static,
            ..Default::default()
        },
        reference_refresh: app_params.reference_refresh,
    };
    let mut scene_accel = SceneAccel::new(&device, scene.root, params)?.with_animation(scene.animator, &app_params.shader)?;

    let mut bottom_level_count = 0;
    let mut reference_uploads = 0;
    for _ in 0..app_params.frames {
        let stats = scene_accel.update(app_params.frame_time)?;
        debug!(
            frame = stats.frame,
            bottom_level = stats.build.bottom_level_count,
            top_level = stats.build.top_level_count,
            instances = stats.build.instance_count,
            custom_indices = ?stats.build.custom_indices,
            references_uploaded = stats.references_uploaded,
            "frame"
        );
        bottom_level_count += stats.build.bottom_level_count;
        if stats.references_uploaded {
            reference_uploads += 1;
        }
    }

    if let (Some(top_level), Some(references)) = (scene_accel.top_level(), scene_accel.references()) {
        info!(
            frames = app_params.frames,
            bottom_level_count,
            reference_uploads,
            top_level_address = top_level.device_address(),
            top_level_instances = top_level.primitive_count(),
            references = references.count(),
            reference_table = references.table.device_address(),
            "done"
        );
    } else {
        warn!(frames = app_params.frames, "scene produced no top level structure");
    }
    Ok(())
}
