//! GLSL shader sources and compilation helpers.
//!
//! All shaders target GLSL 1.40 (OpenGL 3.1), the floor for the programmable
//! backend.

use crate::compositor::PostProcessFlags;
#[cfg(feature = "glow")]
use crate::error::RenderError;

/// Vertex shader for batched sprites.
///
/// # Uniforms
///
/// | Name          | Type   | Description                   |
/// |---------------|--------|-------------------------------|
/// | `u_transform` | `mat4` | Model-view-projection matrix  |
pub const SPRITE_VERTEX_SRC: &str = r"#version 140

in vec3 a_position;
in vec3 a_tex_coord;
in vec4 a_color;

uniform mat4 u_transform;

out vec3 v_tex_coord;
out vec4 v_color;

void main() {
    v_tex_coord = a_tex_coord;
    v_color = a_color;
    gl_Position = u_transform * vec4(a_position, 1.0);
}
";

/// Fragment shader for batched sprites.
///
/// Emulates the fixed-function texture environment of unit 0 through
/// `u_texenv`:
///
/// | Value | Mode                 |
/// |-------|----------------------|
/// | `-1`  | Texturing disabled   |
/// | `0`   | Replace              |
/// | `1`   | Modulate             |
/// | `2`   | Decal                |
/// | `3`   | Add                  |
/// | `4`   | Blend (white)        |
///
/// `u_array` selects the array sampler, indexed by the third texture
/// coordinate.
pub const SPRITE_FRAGMENT_SRC: &str = r"#version 140

in vec3 v_tex_coord;
in vec4 v_color;

uniform sampler2D u_texture;
uniform sampler2DArray u_texture_array;
uniform bool u_array;
uniform int u_texenv;

out vec4 frag_color;

void main() {
    if (u_texenv < 0) {
        frag_color = v_color;
        return;
    }

    vec4 t = u_array
        ? texture(u_texture_array, v_tex_coord)
        : texture(u_texture, v_tex_coord.xy);

    if (u_texenv == 0) {
        frag_color = t;
    } else if (u_texenv == 1) {
        frag_color = t * v_color;
    } else if (u_texenv == 2) {
        frag_color = vec4(mix(v_color.rgb, t.rgb, t.a), v_color.a);
    } else if (u_texenv == 3) {
        frag_color = vec4(v_color.rgb + t.rgb, v_color.a * t.a);
    } else {
        frag_color = vec4(mix(v_color.rgb, vec3(1.0), t.rgb), v_color.a * t.a);
    }
}
";

/// Full-screen triangle strip generated from `gl_VertexID`; draw 4 vertices
/// with no attributes.
pub const POST_PROCESS_VERTEX_SRC: &str = r"#version 140

out vec2 v_uv;

void main() {
    vec2 corner = vec2(float(gl_VertexID & 1), float((gl_VertexID >> 1) & 1));
    v_uv = corner;
    gl_Position = vec4(corner * 2.0 - 1.0, 0.0, 1.0);
}
";

/// Composite fragment shader body. Variants are selected by the `#define`s
/// [`post_process_sources`] prepends.
///
/// # Uniforms
///
/// | Name         | Type        | Present with |
/// |--------------|-------------|--------------|
/// | `u_scene`    | `sampler2D` | `SAMPLE_3D`  |
/// | `u_hud`      | `sampler2D` | `SAMPLE_2D`  |
/// | `u_gamma`    | `float`     | `PALETTE`    |
/// | `u_contrast` | `float`     | `PALETTE`    |
const POST_PROCESS_FRAGMENT_BODY: &str = r"
in vec2 v_uv;

#ifdef SAMPLE_3D
uniform sampler2D u_scene;
#endif
#ifdef SAMPLE_2D
uniform sampler2D u_hud;
#endif
#ifdef PALETTE
uniform float u_gamma;
uniform float u_contrast;
#endif

out vec4 frag_color;

void main() {
    vec4 color = vec4(0.0);

#ifdef SAMPLE_3D
    color = vec4(texture(u_scene, v_uv).rgb, 1.0);
#ifdef TONEMAP
    color.rgb = color.rgb / (color.rgb + vec3(1.0));
#endif
#endif

#ifdef SAMPLE_2D
    // The overlay target holds premultiplied color.
    vec4 hud = texture(u_hud, v_uv);
    color = hud + color * (1.0 - hud.a);
#endif

#ifdef PALETTE
    color.rgb = clamp(pow(color.rgb, vec3(1.0 / u_gamma)) * u_contrast, 0.0, 1.0);
#endif

    frag_color = color;
}
";

/// Vertex and fragment source for the composite variant `flags`.
#[must_use]
pub fn post_process_sources(flags: PostProcessFlags) -> (&'static str, String) {
    let mut fragment = String::from("#version 140\n");
    for (flag, name) in [
        (PostProcessFlags::SAMPLE_3D, "SAMPLE_3D"),
        (PostProcessFlags::SAMPLE_2D, "SAMPLE_2D"),
        (PostProcessFlags::PALETTE, "PALETTE"),
        (PostProcessFlags::TONEMAP, "TONEMAP"),
    ] {
        if flags.contains(flag) {
            fragment.push_str("#define ");
            fragment.push_str(name);
            fragment.push('\n');
        }
    }
    fragment.push_str(POST_PROCESS_FRAGMENT_BODY);
    (POST_PROCESS_VERTEX_SRC, fragment)
}

/// Compile and link a program from vertex and fragment source.
///
/// Stage objects never outlive the call; only the program handle is
/// returned.
///
/// # Safety
///
/// Requires a valid, current OpenGL context.
///
/// # Errors
///
/// Returns [`RenderError::Shader`] with the driver log of the first stage
/// that failed to compile, or of the link.
#[cfg(feature = "glow")]
pub(crate) unsafe fn compile_program(
    gl: &glow::Context,
    vertex_src: &str,
    fragment_src: &str,
) -> Result<glow::Program, RenderError> {
    use glow::HasContext;

    let mut stages = Vec::with_capacity(2);
    for (kind, label, source) in [
        (glow::VERTEX_SHADER, "vertex", vertex_src),
        (glow::FRAGMENT_SHADER, "fragment", fragment_src),
    ] {
        match unsafe { compile_stage(gl, kind, source) } {
            Ok(stage) => stages.push(stage),
            Err(log) => {
                for stage in stages {
                    unsafe { gl.delete_shader(stage) };
                }
                return Err(RenderError::Shader(format!("{label} stage: {log}")));
            }
        }
    }

    unsafe {
        let program = gl.create_program().map_err(RenderError::Shader)?;
        for &stage in &stages {
            gl.attach_shader(program, stage);
        }
        gl.link_program(program);
        let result = if gl.get_program_link_status(program) {
            Ok(program)
        } else {
            let log = gl.get_program_info_log(program);
            gl.delete_program(program);
            Err(RenderError::Shader(format!("link: {log}")))
        };
        for &stage in &stages {
            if result.is_ok() {
                gl.detach_shader(program, stage);
            }
            gl.delete_shader(stage);
        }
        result
    }
}

#[cfg(feature = "glow")]
unsafe fn compile_stage(gl: &glow::Context, kind: u32, source: &str) -> Result<glow::Shader, String> {
    use glow::HasContext;

    unsafe {
        let stage = gl.create_shader(kind)?;
        gl.shader_source(stage, source);
        gl.compile_shader(stage);
        if gl.get_shader_compile_status(stage) {
            Ok(stage)
        } else {
            let log = gl.get_shader_info_log(stage);
            gl.delete_shader(stage);
            Err(log)
        }
    }
}
