//! A scripted DCM1 on a loopback socket
//!
//! Answers queries from a small in-memory model, records every frame it
//! receives per connection, and can drop the active connection on demand.

use cloud_dcm1::FrameBuffer;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::Notify;
use tokio::task::JoinHandle;

#[derive(Debug, Clone, Copy)]
struct ZoneModel {
    level: u8,
    source: u8,
    muted: bool,
    eq: [i8; 3],
}

/// Device-side state, persisted across connections
struct DeviceModel {
    zones: [ZoneModel; 8],
    /// When false, set commands are swallowed and queries go unanswered
    answering: bool,
}

impl DeviceModel {
    fn new() -> Self {
        let mut zones = [ZoneModel {
            level: 30,
            source: 1,
            muted: false,
            eq: [0; 3],
        }; 8];
        for (i, zone) in zones.iter_mut().enumerate() {
            zone.source = (i as u8 % 8) + 1;
        }
        Self {
            zones,
            answering: true,
        }
    }

    fn respond(&mut self, frame: &str) -> Option<String> {
        if !self.answering {
            return None;
        }
        let body = frame.strip_prefix('<')?.strip_suffix("/>")?;
        let (address, rest) = body.split_once('.')?;

        if let Some(id) = address.strip_prefix('L') {
            let id: u8 = id.parse().ok()?;
            return (rest == "LABEL,Q").then(|| format!("<l{}.label=Source {}/>", id, id));
        }

        let z: u8 = address.strip_prefix('Z')?.parse().ok()?;
        let zone = self.zones.get_mut(usize::from(z).checked_sub(1)?)?;

        if rest == "LABEL,Q" {
            return Some(format!("<z{}.label=Zone {}/>", z, z));
        }
        if let Some(source) = rest.strip_prefix('L').and_then(|s| s.strip_suffix(",Q")) {
            let source: u8 = source.parse().ok()?;
            return Some(format!("<z{}.l{}={}/>", z, source, u8::from(source % 2 == 1)));
        }

        let arg = rest.strip_prefix("MU,")?;
        match arg {
            "LQ" => Some(format!("<z{}.mu,l={}/>", z, zone.level)),
            "SQ" => Some(format!("<z{}.mu,s={}/>", z, zone.source)),
            "MQ" => Some(format!(
                "<z{}.mu,mute={}/>",
                z,
                if zone.muted { "on" } else { "off" }
            )),
            "EQQ" => Some(format!(
                "<z{}.mu,eq, t = {:+}, m = {:+}, b = {:+}/>",
                z, zone.eq[0], zone.eq[1], zone.eq[2]
            )),
            "M" => {
                zone.muted = true;
                None
            }
            "O" => {
                zone.muted = false;
                None
            }
            _ => {
                let (key, value) = arg.split_at(1);
                match key {
                    "L" => zone.level = value.parse().ok()?,
                    "S" => zone.source = value.parse().ok()?,
                    "T" | "M" | "B" => {
                        let value: i8 = value.parse().ok()?;
                        let band = match key {
                            "T" => 0,
                            "M" => 1,
                            _ => 2,
                        };
                        zone.eq[band] = value;
                        return Some(format!(
                            "<z{}.mu,{}={:+}/>",
                            z,
                            key.to_ascii_lowercase(),
                            value
                        ));
                    }
                    _ => {}
                }
                None
            }
        }
    }
}

pub struct FakeDevice {
    pub port: u16,
    model: Arc<Mutex<DeviceModel>>,
    received: Arc<Mutex<Vec<Vec<String>>>>,
    kick: Arc<Notify>,
    task: JoinHandle<()>,
}

impl FakeDevice {
    pub async fn start() -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let model = Arc::new(Mutex::new(DeviceModel::new()));
        let received = Arc::new(Mutex::new(Vec::new()));
        let kick = Arc::new(Notify::new());

        let task = {
            let model = model.clone();
            let received = received.clone();
            let kick = kick.clone();
            tokio::spawn(async move {
                while let Ok((stream, _)) = listener.accept().await {
                    let connection = {
                        let mut received = received.lock().unwrap();
                        received.push(Vec::new());
                        received.len() - 1
                    };
                    tokio::spawn(serve(
                        stream,
                        connection,
                        model.clone(),
                        received.clone(),
                        kick.clone(),
                    ));
                }
            })
        };

        Self {
            port,
            model,
            received,
            kick,
            task,
        }
    }

    /// Frames received on the nth accepted connection
    pub fn received(&self, connection: usize) -> Vec<String> {
        self.received
            .lock()
            .unwrap()
            .get(connection)
            .cloned()
            .unwrap_or_default()
    }

    pub fn connections(&self) -> usize {
        self.received.lock().unwrap().len()
    }

    /// Close the active connection from the device side
    pub fn drop_connection(&self) {
        self.kick.notify_one();
    }

    pub fn set_answering(&self, answering: bool) {
        self.model.lock().unwrap().answering = answering;
    }

    pub fn zone_level(&self, zone: u8) -> u8 {
        self.model.lock().unwrap().zones[usize::from(zone) - 1].level
    }

    /// Poll until `done` holds for the frames on `connection`
    pub async fn wait_for(
        &self,
        connection: usize,
        timeout: Duration,
        done: impl Fn(&[String]) -> bool,
    ) -> bool {
        let deadline = tokio::time::Instant::now() + timeout;
        while tokio::time::Instant::now() < deadline {
            if done(&self.received(connection)) {
                return true;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        false
    }
}

impl Drop for FakeDevice {
    fn drop(&mut self) {
        self.task.abort();
    }
}

async fn serve(
    stream: TcpStream,
    connection: usize,
    model: Arc<Mutex<DeviceModel>>,
    received: Arc<Mutex<Vec<Vec<String>>>>,
    kick: Arc<Notify>,
) {
    let (mut reader, mut writer) = stream.into_split();
    let mut frames = FrameBuffer::new();
    let mut buf = [0u8; 512];

    loop {
        let n = tokio::select! {
            _ = kick.notified() => return,
            read = reader.read(&mut buf) => match read {
                Ok(0) | Err(_) => return,
                Ok(n) => n,
            },
        };

        for frame in frames.push(&buf[..n]) {
            received.lock().unwrap()[connection].push(frame.clone());
            let reply = model.lock().unwrap().respond(&frame);
            if let Some(reply) = reply {
                if writer.write_all(format!("{}\r\n", reply).as_bytes()).await.is_err() {
                    return;
                }
            }
        }
    }
}
