// Build script to compile the demo's GLSL shaders to SPIR-V
//
// Missing glslc is not fatal: the library does not need the shaders, and the
// demo binary reports missing .spv files at startup.

use std::path::Path;
use std::process::Command;

fn main() {
    println!("cargo:rerun-if-changed=shaders/");

    compile_shader("shaders/triangle.vert", "shaders/triangle.vert.spv");
    compile_shader("shaders/triangle.frag", "shaders/triangle.frag.spv");
}

fn compile_shader(input: &str, output: &str) {
    let input_path = Path::new(input);
    if !input_path.exists() {
        println!("cargo:warning=shader source {} not found", input);
        return;
    }

    let result = Command::new("glslc").arg(input_path).arg("-o").arg(output).status();

    match result {
        Ok(status) if status.success() => {}
        Ok(status) => {
            println!("cargo:warning=failed to compile {}: exit code {:?}", input, status.code());
        }
        Err(e) => {
            println!("cargo:warning=glslc not found ({}); compile manually: glslc {} -o {}", e, input, output);
        }
    }
}
