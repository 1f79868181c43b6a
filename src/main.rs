// Headless sync daemon for the local mindmap store
fn main() {
    if let Err(e) = workflow_mindmaps_lib::run() {
        eprintln!("workflow-mindmaps failed: {}", e);
        std::process::exit(1);
    }
}
