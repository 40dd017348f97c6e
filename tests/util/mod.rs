use colstore::index::Precision;
use colstore::index::layout::{doclens_path, store_path};
use half::f16;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use std::path::Path;

/// Captures tracing output for tests.
#[allow(dead_code)]
pub struct TestTracing {
    buffer: std::sync::Arc<std::sync::Mutex<Vec<u8>>>,
}

#[allow(dead_code)]
impl TestTracing {
    pub fn new() -> Self {
        Self {
            buffer: std::sync::Arc::new(std::sync::Mutex::new(Vec::new())),
        }
    }

    pub fn install(&self) -> tracing::subscriber::DefaultGuard {
        let writer = self.buffer.clone();
        let make_writer = move || TestWriter(writer.clone());
        let subscriber = tracing_subscriber::fmt()
            .with_ansi(false)
            .without_time()
            .with_max_level(tracing::Level::DEBUG)
            .with_writer(make_writer)
            .finish();
        tracing::subscriber::set_default(subscriber)
    }

    pub fn output(&self) -> String {
        let buf = self.buffer.lock().unwrap();
        String::from_utf8_lossy(&buf).to_string()
    }

    pub fn assert_contains(&self, needle: &str) {
        let out = self.output();
        assert!(
            out.contains(needle),
            "expected logs to contain `{needle}`, got:\n{out}"
        );
    }
}

struct TestWriter(std::sync::Arc<std::sync::Mutex<Vec<u8>>>);

impl std::io::Write for TestWriter {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        let mut guard = self.0.lock().unwrap();
        guard.extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

#[allow(dead_code)]
pub struct EnvGuard {
    key: String,
    prev: Option<String>,
}

#[allow(dead_code)]
impl EnvGuard {
    pub fn set(key: &str, val: impl AsRef<str>) -> Self {
        let prev = std::env::var(key).ok();
        unsafe { std::env::set_var(key, val.as_ref()) };
        Self {
            key: key.to_string(),
            prev,
        }
    }
}

impl Drop for EnvGuard {
    fn drop(&mut self) {
        match &self.prev {
            Some(v) => unsafe { std::env::set_var(&self.key, v) },
            None => unsafe { std::env::remove_var(&self.key) },
        }
    }
}

/// Per-document token rows: `docs[d][j]` is row `j` of document `d`.
pub type Shard = Vec<Vec<Vec<f32>>>;

/// Write one shard pair (`doclens.{n}.json` + `{n}.store`).
#[allow(dead_code)]
pub fn write_shard(root: &Path, n: usize, docs: &Shard, precision: Precision) {
    let doclens: Vec<usize> = docs.iter().map(Vec::len).collect();
    std::fs::write(doclens_path(root, n), serde_json::to_string(&doclens).unwrap()).unwrap();
    let values = docs.iter().flatten().flatten();
    let bytes: Vec<u8> = match precision {
        Precision::F16 => values.flat_map(|v| f16::from_f32(*v).to_le_bytes()).collect(),
        Precision::F32 => values.flat_map(|v| v.to_le_bytes()).collect(),
    };
    std::fs::write(store_path(root, n), bytes).unwrap();
}

/// Deterministic shard contents. Values are multiples of 1/8 so f16
/// round-trips them exactly.
#[allow(dead_code)]
pub fn random_shard(seed: u64, documents: usize, max_doclen: usize, dim: usize) -> Shard {
    let mut rng = ChaCha8Rng::seed_from_u64(seed);
    (0..documents)
        .map(|_| {
            let len = rng.gen_range(1..=max_doclen);
            (0..len)
                .map(|_| (0..dim).map(|_| rng.gen_range(-16i32..=16) as f32 / 8.0).collect())
                .collect()
        })
        .collect()
}

/// Write `shards` under `root` in order.
#[allow(dead_code)]
pub fn write_index(root: &Path, shards: &[Shard], precision: Precision) {
    for (n, docs) in shards.iter().enumerate() {
        write_shard(root, n, docs, precision);
    }
}
