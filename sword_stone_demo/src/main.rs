//! Sword and Stone demo
//!
//! Opens a window, lets the engine pick the first backend that initializes on
//! it, and spins a colored quad until the window is closed.
//!
//! The backend order can be forced with `SWORD_STONE_API` (`opengl`, `dx11`,
//! `dx12`).
//!
//! Run with: cargo run -p sword_stone_demo

use std::time::Instant;

use glam::{Mat4, Vec3, Vec4};
use raw_window_handle::{HasDisplayHandle, HasWindowHandle};
use sword_stone_engine::stone::render::{
    BufferUsage, ClearFlags, Handle, NativeWindow, PrimitiveTopology, RenderApi, RendererConfig, Vertex,
};
use sword_stone_engine::stone::{Engine, Renderer, Result, SharedRenderer};
use sword_stone_engine::{engine_error, engine_info};
use winit::application::ApplicationHandler;
use winit::dpi::LogicalSize;
use winit::event::WindowEvent;
use winit::event_loop::{ActiveEventLoop, ControlFlow, EventLoop};
use winit::window::{Window, WindowAttributes, WindowId};

const WIDTH: u32 = 1280;
const HEIGHT: u32 = 720;

const GLSL_VERTEX_SHADER: &str = r#"
#version 330 core
layout(location = 0) in vec3 aPosition;
layout(location = 3) in vec4 aColor;
uniform mat4 uModel;
out vec4 vColor;
void main() {
    vColor = aColor;
    gl_Position = uModel * vec4(aPosition, 1.0);
}
"#;

const GLSL_FRAGMENT_SHADER: &str = r#"
#version 330 core
in vec4 vColor;
out vec4 FragColor;
void main() {
    FragColor = vColor;
}
"#;

const HLSL_VERTEX_SHADER: &str = r#"
cbuffer Transform : register(b0) { float4x4 uModel; };
struct VsOut { float4 position : SV_Position; float4 color : COLOR; };
VsOut main(float3 position : POSITION, float4 color : COLOR) {
    VsOut result;
    result.position = mul(uModel, float4(position, 1.0));
    result.color = color;
    return result;
}
"#;

const HLSL_PIXEL_SHADER: &str = r#"
float4 main(float4 position : SV_Position, float4 color : COLOR) : SV_Target {
    return color;
}
"#;

/// Shader pair in the language the backend compiles
fn shader_sources(api: RenderApi) -> (&'static str, &'static str) {
    match api {
        RenderApi::DirectX11 | RenderApi::DirectX12 => (HLSL_VERTEX_SHADER, HLSL_PIXEL_SHADER),
        _ => (GLSL_VERTEX_SHADER, GLSL_FRAGMENT_SHADER),
    }
}

/// GPU objects of the spinning quad
struct Scene {
    vertex_buffer: Handle,
    index_buffer: Handle,
    shader: Handle,
    angle: f32,
}

impl Scene {
    fn create(renderer: &mut dyn Renderer) -> Self {
        let vertices = [
            Vertex::colored(Vec3::new(-0.5, -0.5, 0.0), Vec4::new(1.0, 0.2, 0.2, 1.0)),
            Vertex::colored(Vec3::new(0.5, -0.5, 0.0), Vec4::new(0.2, 1.0, 0.2, 1.0)),
            Vertex::colored(Vec3::new(0.5, 0.5, 0.0), Vec4::new(0.2, 0.2, 1.0, 1.0)),
            Vertex::colored(Vec3::new(-0.5, 0.5, 0.0), Vec4::new(1.0, 1.0, 0.2, 1.0)),
        ];
        let indices = [0u32, 1, 2, 2, 3, 0];
        let bytes = Vertex::slice_as_bytes(&vertices);
        let (vertex_shader, pixel_shader) = shader_sources(renderer.api());

        let scene = Self {
            vertex_buffer: renderer.create_vertex_buffer(Some(bytes), bytes.len(), BufferUsage::Static),
            index_buffer: renderer.create_index_buffer(Some(&indices), indices.len(), BufferUsage::Static),
            shader: renderer.create_shader(vertex_shader, pixel_shader),
            angle: 0.0,
        };
        if scene.shader.is_null() {
            engine_error!("demo", "Shader failed: {}", renderer.last_shader_error().unwrap_or("unknown"));
        }
        scene
    }

    fn render(&mut self, renderer: &mut dyn Renderer, delta: f32) {
        self.angle += delta * std::f32::consts::FRAC_PI_2;
        let model = Mat4::from_rotation_z(self.angle);

        renderer.begin_frame();
        renderer.clear_with_default(ClearFlags::ALL);
        renderer.bind_shader(self.shader);
        renderer.set_shader_uniform(self.shader, "uModel", bytemuck::bytes_of(&model));
        renderer.draw_indexed(self.vertex_buffer, self.index_buffer, 6, PrimitiveTopology::TriangleList);
        renderer.end_frame();
        renderer.present();
    }

    fn destroy(&self, renderer: &mut dyn Renderer) {
        renderer.delete_buffer(self.vertex_buffer);
        renderer.delete_buffer(self.index_buffer);
        renderer.delete_shader(self.shader);
    }
}

struct DemoApp {
    config: RendererConfig,
    window: Option<Window>,
    renderer: Option<SharedRenderer>,
    scene: Option<Scene>,
    last_frame: Instant,
    frames: u64,
}

impl DemoApp {
    fn new(config: RendererConfig) -> Self {
        Self {
            config,
            window: None,
            renderer: None,
            scene: None,
            last_frame: Instant::now(),
            frames: 0,
        }
    }

    fn start(&mut self, event_loop: &ActiveEventLoop) -> Result<()> {
        let attributes = WindowAttributes::default()
            .with_title("Sword and Stone")
            .with_inner_size(LogicalSize::new(WIDTH, HEIGHT));
        let window = event_loop
            .create_window(attributes)
            .map_err(|e| sword_stone_engine::engine_err!("demo", "Window creation failed: {}", e))?;
        let handle = window
            .window_handle()
            .map_err(|e| sword_stone_engine::engine_err!("demo", "No native window handle: {}", e))?;
        let display = window
            .display_handle()
            .map_err(|e| sword_stone_engine::engine_err!("demo", "No native display handle: {}", e))?;
        let native = NativeWindow::new(handle.as_raw(), Some(display.as_raw()));
        let size = window.inner_size();

        let api = Engine::create_renderer_with_fallback(native, size.width, size.height, self.config.clone())?;
        engine_info!("demo", "Rendering with {}", api);

        let renderer = Engine::renderer()?;
        if let Ok(mut guard) = renderer.lock() {
            self.scene = Some(Scene::create(guard.as_mut()));
        }
        self.renderer = Some(renderer);
        self.window = Some(window);
        self.last_frame = Instant::now();
        Ok(())
    }

    fn redraw(&mut self) {
        let now = Instant::now();
        let delta = now.duration_since(self.last_frame).as_secs_f32();
        self.last_frame = now;

        if let (Some(renderer), Some(scene)) = (&self.renderer, &mut self.scene) {
            if let Ok(mut guard) = renderer.lock() {
                scene.render(guard.as_mut(), delta);
                self.frames += 1;
                if self.frames % 600 == 0 {
                    let stats = guard.stats();
                    engine_info!(
                        "demo",
                        "Frame {}: {} draw calls, {} triangles, {:.1} fps",
                        self.frames,
                        stats.draw_calls,
                        stats.triangles,
                        1.0 / delta.max(f32::EPSILON)
                    );
                }
            }
        }
    }

    fn stop(&mut self) {
        if let (Some(renderer), Some(scene)) = (&self.renderer, self.scene.take()) {
            if let Ok(mut guard) = renderer.lock() {
                scene.destroy(guard.as_mut());
            }
        }
        self.renderer = None;
        if let Err(e) = Engine::destroy_renderer() {
            engine_error!("demo", "Renderer teardown failed: {}", e);
        }
        self.window = None;
    }
}

impl ApplicationHandler for DemoApp {
    fn resumed(&mut self, event_loop: &ActiveEventLoop) {
        if self.window.is_some() {
            return;
        }
        if let Err(e) = self.start(event_loop) {
            engine_error!("demo", "Startup failed: {}", e);
            event_loop.exit();
        }
    }

    fn window_event(&mut self, event_loop: &ActiveEventLoop, _window_id: WindowId, event: WindowEvent) {
        match event {
            WindowEvent::CloseRequested => {
                self.stop();
                event_loop.exit();
            }
            WindowEvent::Resized(size) => {
                if let Some(renderer) = &self.renderer {
                    if let Ok(mut guard) = renderer.lock() {
                        guard.resize(size.width, size.height);
                    }
                }
            }
            WindowEvent::RedrawRequested => self.redraw(),
            _ => {}
        }
    }

    fn about_to_wait(&mut self, _event_loop: &ActiveEventLoop) {
        if let Some(window) = &self.window {
            window.request_redraw();
        }
    }
}

fn config_from_env() -> Result<RendererConfig> {
    let mut config = RendererConfig {
        app_name: "Sword and Stone Demo".to_string(),
        ..Default::default()
    };
    if let Ok(name) = std::env::var("SWORD_STONE_API") {
        let api: RenderApi = name.parse()?;
        config.preferred_apis = vec![api];
    }
    Ok(config)
}

fn main() -> std::result::Result<(), Box<dyn std::error::Error>> {
    Engine::initialize()?;
    let config = config_from_env()?;

    let event_loop = EventLoop::new()?;
    event_loop.set_control_flow(ControlFlow::Poll);

    let mut app = DemoApp::new(config);
    event_loop.run_app(&mut app)?;

    Engine::shutdown();
    Ok(())
}
