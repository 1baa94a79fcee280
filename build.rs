//! Build script for pfwd
//!
//! Embeds build-time information (git commit, dirty status, build timestamp)
//! surfaced through `pfwd --version`.

fn main() {
    shadow_rs::ShadowBuilder::builder()
        .build()
        .expect("Failed to generate build info");
}
