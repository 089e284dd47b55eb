//! Shared utilities for integration tests.
#![allow(dead_code)]

use std::path::Path;

use dash_sim::SimulationConfig;

/// Catalog text with `segments` equal-sized segments per representation.
pub fn catalog_text(sizes: &[u64], segments: usize) -> String {
    let mut text = String::new();
    for size in sizes {
        let row: Vec<String> = (0..segments).map(|_| size.to_string()).collect();
        text.push_str(&row.join(" "));
        text.push('\n');
    }
    text
}

/// Lay out a run under `dir`: one video `clip.txt` and the client file.
pub fn write_run(dir: &Path, simulation_id: u32, clients: &str, number_of_clients: u32) -> SimulationConfig {
    let config = SimulationConfig {
        simulation_name: "dumbbell".into(),
        simulation_id,
        number_of_clients,
        log_dir: dir.join("logs"),
        video_dir: dir.join("videos"),
        ..Default::default()
    };
    std::fs::create_dir_all(&config.video_dir).expect("create video dir");
    std::fs::write(
        config.video_dir.join("clip.txt"),
        catalog_text(&[150_000, 400_000, 900_000], 8),
    )
    .expect("write catalog");

    let layout = config.layout();
    std::fs::create_dir_all(layout.run_dir()).expect("create run dir");
    std::fs::write(layout.clients_file(), clients).expect("write clients");
    config
}
