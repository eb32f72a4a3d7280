// Build script to compile GLSL shaders to SPIR-V
//
// glslc is optional: without it the renderer falls back to clear-only frames
// unless the .spv files were produced some other way.

use std::path::Path;
use std::process::Command;

const SHADERS: [&str; 2] = ["shaders/geometry.vert", "shaders/geometry.frag"];

fn main() {
    for shader in SHADERS {
        println!("cargo:rerun-if-changed={}", shader);
        compile_shader(shader, &format!("{}.spv", shader));
    }
}

fn compile_shader(input: &str, output: &str) {
    if !Path::new(input).exists() {
        println!("cargo:warning=Shader source {} not found, skipping", input);
        return;
    }

    match Command::new("glslc").arg(input).arg("-o").arg(output).status() {
        Ok(status) if status.success() => {}
        Ok(status) => {
            panic!("Failed to compile {}: exit code {:?}", input, status.code());
        }
        Err(e) => {
            println!("cargo:warning=glslc not found ({}), {} was not compiled", e, input);
            println!("cargo:warning=Install the Vulkan SDK or run: glslc {} -o {}", input, output);
        }
    }
}
