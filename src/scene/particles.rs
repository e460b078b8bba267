//! Particle emitter description
//!
//! Emitters are collected with the rest of the frame's render data. Simulating
//! and drawing particles is left to the caller.

use crate::backend::types::TextureHandle;
use glam::{Vec3, Vec4};

#[derive(Debug, Clone, PartialEq)]
pub struct ParticleEmitter {
    pub max_particles: u32,
    /// Particles spawned per second
    pub spawn_rate: f32,
    /// Seconds
    pub lifetime: f32,
    pub initial_velocity: Vec3,
    pub start_color: Vec4,
    pub end_color: Vec4,
    pub size: f32,
    pub texture: Option<TextureHandle>,
    /// Emitter origin, derived from the owning node
    pub position: Vec3,
}

impl Default for ParticleEmitter {
    fn default() -> Self {
        Self {
            max_particles: 1000,
            spawn_rate: 50.0,
            lifetime: 2.0,
            initial_velocity: Vec3::Y,
            start_color: Vec4::ONE,
            end_color: Vec4::new(1.0, 1.0, 1.0, 0.0),
            size: 0.1,
            texture: None,
            position: Vec3::ZERO,
        }
    }
}

impl ParticleEmitter {
    pub fn new(max_particles: u32, spawn_rate: f32, lifetime: f32) -> Self {
        Self {
            max_particles,
            spawn_rate,
            lifetime,
            ..Default::default()
        }
    }
}
