use clap::Parser;

/// Composites a region of the desktop into a keyed-mutex shared texture, acting as both the
/// producer and a consumer that hands the texture back after every frame.
#[derive(Parser)]
#[cfg_attr(not(windows), allow(dead_code))]
#[command(name = "Capture Region")]
#[command(version = "1.0")]
#[command(about = "Composites a desktop region into a shared texture")]
struct Cli {
    /// Left edge of the region, defaults to the desktop's
    #[arg(long, allow_hyphen_values = true)]
    x: Option<i32>,

    /// Top edge of the region, defaults to the desktop's
    #[arg(long, allow_hyphen_values = true)]
    y: Option<i32>,

    /// Width of the region, defaults to the desktop's
    #[arg(long)]
    width: Option<u32>,

    /// Height of the region, defaults to the desktop's
    #[arg(long)]
    height: Option<u32>,

    /// Number of frames to composite, runs until Ctrl+C when omitted
    #[arg(long)]
    frames: Option<u64>,

    /// Per-attempt keyed mutex wait in milliseconds
    #[arg(long, default_value_t = 1000)]
    lock_timeout_ms: u32,
}

#[cfg(windows)]
mod demo {
    use std::error::Error;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::thread;
    use std::time::{Duration, Instant};

    use desktop_compositor::d3d11::D3D11Context;
    use desktop_compositor::{Error as CompositorError, Rect, Session, Settings, SharedHandle};
    use log::{info, warn};
    use windows::Win32::Graphics::Direct3D11::{
        D3D11_BIND_RENDER_TARGET, D3D11_BIND_SHADER_RESOURCE, D3D11_RESOURCE_MISC_SHARED_KEYEDMUTEX,
        D3D11_TEXTURE2D_DESC, D3D11_USAGE_DEFAULT,
    };
    use windows::Win32::Graphics::Dxgi::Common::{DXGI_FORMAT_B8G8R8A8_UNORM, DXGI_SAMPLE_DESC};
    use windows::Win32::Graphics::Dxgi::{IDXGIKeyedMutex, IDXGIResource};
    use windows::core::Interface;

    use super::Cli;

    const PRODUCER_KEY: u64 = 0;
    const CONSUMER_KEY: u64 = 1;
    const INFINITE: u32 = u32::MAX;

    pub fn run(cli: Cli) -> Result<(), Box<dyn Error>> {
        let stop_flag = Arc::new(AtomicBool::new(false));

        // Set up Ctrl+C handler
        {
            let stop_flag = stop_flag.clone();
            ctrlc::set_handler(move || {
                stop_flag.store(true, Ordering::SeqCst);
            })?;
        }

        // The compositor draws under the producer key and hands the texture to the consumer.
        let settings = Settings::default().with_keys(PRODUCER_KEY, CONSUMER_KEY).with_lock_timeout_ms(cli.lock_timeout_ms);
        let mut session = Session::open(settings)?;

        for display in session.capture_manager().displays() {
            println!(
                "Display {}: {} at {}, {:?}",
                display.index(),
                display.name(),
                display.rect(),
                display.rotation()
            );
        }

        let desktop = session.desktop_rect();
        let target = Rect::new(
            cli.x.unwrap_or(desktop.x),
            cli.y.unwrap_or(desktop.y),
            cli.width.unwrap_or(desktop.width),
            cli.height.unwrap_or(desktop.height),
        );
        println!("Compositing {target} of desktop {desktop}");

        // The consumer lives on its own device, as it would in another process.
        let consumer = D3D11Context::create()?;
        let texture_desc = D3D11_TEXTURE2D_DESC {
            Width: target.width,
            Height: target.height,
            MipLevels: 1,
            ArraySize: 1,
            Format: DXGI_FORMAT_B8G8R8A8_UNORM,
            SampleDesc: DXGI_SAMPLE_DESC { Count: 1, Quality: 0 },
            Usage: D3D11_USAGE_DEFAULT,
            BindFlags: D3D11_BIND_RENDER_TARGET.0 as u32 | D3D11_BIND_SHADER_RESOURCE.0 as u32,
            CPUAccessFlags: 0,
            MiscFlags: D3D11_RESOURCE_MISC_SHARED_KEYEDMUTEX.0 as u32,
        };

        let mut texture = None;
        unsafe { consumer.device().CreateTexture2D(&texture_desc, None, Some(&mut texture))? };
        let texture = texture.ok_or("CreateTexture2D returned no texture")?;

        let shared_handle = unsafe { texture.cast::<IDXGIResource>()?.GetSharedHandle()? };
        let keyed_mutex = texture.cast::<IDXGIKeyedMutex>()?;
        let destination = SharedHandle::from_raw(shared_handle.0);

        let started = Instant::now();
        let mut frames = 0_u64;
        while !stop_flag.load(Ordering::SeqCst) && cli.frames.is_none_or(|limit| frames < limit) {
            match session.capture_into_buffer(destination, target) {
                Ok(()) => (),
                Err(CompositorError::AccessLost) => {
                    warn!("Duplication access lost, re-enumerating displays");
                    match session.reinitialize_outputs() {
                        Ok(()) => (),
                        Err(e) if e.is_retryable() => thread::sleep(Duration::from_millis(100)),
                        Err(e) => return Err(e.into()),
                    }
                    continue;
                }
                Err(e) if e.is_retryable() => {
                    warn!("{e}, retrying");
                    thread::sleep(Duration::from_millis(100));
                    continue;
                }
                Err(e) => return Err(e.into()),
            }

            // Consumer turn: take the frame and give the texture back to the compositor.
            unsafe {
                keyed_mutex.AcquireSync(CONSUMER_KEY, INFINITE)?;
                keyed_mutex.ReleaseSync(PRODUCER_KEY)?;
            }

            frames += 1;
            if frames % 60 == 0 {
                info!("{frames} frames, {:.1} fps", frames as f64 / started.elapsed().as_secs_f64());
            }
        }

        println!("Composited {frames} frame(s) in {:.2?}", started.elapsed());
        session.shutdown();

        Ok(())
    }
}

#[cfg(windows)]
fn main() {
    env_logger::init();

    let cli = Cli::parse();
    if let Err(e) = demo::run(cli) {
        eprintln!("Error: {e}");
        std::process::exit(1);
    }
}

#[cfg(not(windows))]
fn main() {
    env_logger::init();

    let _ = Cli::parse();
    eprintln!("Error: {}", desktop_compositor::Error::NotSupported);
    std::process::exit(1);
}
