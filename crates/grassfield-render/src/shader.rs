//! Shader management.

use crate::error::{RenderError, RenderResult};

/// Fine-cull compute program.
pub const FINE_CULL_WGSL: &str = include_str!("shaders/fine_cull.wgsl");

/// Instanced grass draw program.
pub const GRASS_WGSL: &str = include_str!("shaders/grass.wgsl");

/// Builder for WGSL shader modules.
///
/// Several sources may be concatenated into one module, for example shared
/// struct declarations followed by entry points.
pub struct ShaderBuilder {
    sources: Vec<String>,
    label: Option<String>,
}

impl ShaderBuilder {
    /// Creates a new shader builder.
    #[must_use]
    pub fn new() -> Self {
        Self {
            sources: Vec::new(),
            label: None,
        }
    }

    /// Appends WGSL source.
    #[must_use]
    pub fn with_source(mut self, source: impl Into<String>) -> Self {
        self.sources.push(source.into());
        self
    }

    /// Sets the shader label for debugging.
    #[must_use]
    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = Some(label.into());
        self
    }

    /// Builds the shader module.
    ///
    /// WGSL validation errors are reported through the device's error
    /// scopes; this only rejects an empty builder.
    pub fn build_module(self, device: &wgpu::Device) -> RenderResult<wgpu::ShaderModule> {
        let source = self.combined_source()?;

        Ok(device.create_shader_module(wgpu::ShaderModuleDescriptor {
            label: self.label.as_deref(),
            source: wgpu::ShaderSource::Wgsl(source.into()),
        }))
    }

    fn combined_source(&self) -> RenderResult<String> {
        if self.sources.iter().all(|s| s.trim().is_empty()) {
            let label = self.label.as_deref().unwrap_or("unnamed");
            return Err(RenderError::ShaderCompilationFailed(format!(
                "no source for shader '{label}'"
            )));
        }
        Ok(self.sources.join("\n\n"))
    }
}

impl Default for ShaderBuilder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_builder_is_rejected() {
        let builder = ShaderBuilder::new().with_label("empty");
        assert!(matches!(
            builder.combined_source(),
            Err(RenderError::ShaderCompilationFailed(_))
        ));
    }

    #[test]
    fn test_sources_are_joined_in_order() {
        let builder = ShaderBuilder::new().with_source("struct A {}").with_source("fn f() {}");
        let source = builder.combined_source().unwrap();
        assert!(source.find("struct A").unwrap() < source.find("fn f").unwrap());
    }

    #[test]
    fn test_programs_declare_entry_points() {
        assert!(FINE_CULL_WGSL.contains("@workgroup_size(64)"));
        assert!(GRASS_WGSL.contains("fn vs_main"));
        assert!(GRASS_WGSL.contains("fn fs_main"));
    }
}
