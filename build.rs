// build.rs

fn main() {
    // Generate build info, printed by `herakles-proc-inspect check`
    vergen::EmitBuilder::builder()
        .all_build()
        .all_git()
        .emit()
        .expect("Unable to generate build info");
}
