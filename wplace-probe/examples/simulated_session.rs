use wplace_probe::{
    Engine, HostValue, MemoryDocument, PixelCoord, PixelRecord, PlainObject, ProbeError, Rect,
    Rgba, TileCoord,
};

#[tokio::main]
async fn main() -> Result<(), ProbeError> {
    wplace_probe::init_tracing();

    let engine = Engine::install_default()?;

    // The host writes a pending pixel edit into one of its maps.
    let edits = engine.layer().new_map();
    let record = PixelRecord {
        color: Rgba::opaque(228, 92, 26),
        tile: TileCoord(1611, 875),
        pixel: PixelCoord(313, 795),
        season: 0,
        color_idx: 6,
    };
    edits.set(HostValue::from(record.key().to_string()), record.to_host()?);
    // Unrelated traffic after the capture goes straight through.
    edits.set(HostValue::from("theme"), PlainObject::new().with("dark", true).into());

    let pixels = engine.registry().require_pixel_map()?;
    for (key, record) in pixels.pixel_records() {
        println!("{key} -> global {:?}, color {:?}", key.global(), record.color);
    }
    println!(
        "registry: {}",
        serde_json::to_string(&engine.registry().snapshot())?
    );

    let page = MemoryDocument::new();
    page.append(
        None,
        "canvas",
        &["maplibregl-canvas", "maplibregl-interactive"],
        Rect::new(0.0, 56.0, 1280.0, 664.0),
    );
    page.append(None, "button", &["btn", "btn-lg", "relative"], Rect::default());
    let tooltip = page.append(None, "div", &["tooltip", "ml-auto"], Rect::default());
    page.append(Some(&tooltip), "button", &["btn"], Rect::default());

    let report = engine.sequencer()?.run(&page).await;
    println!("{}", serde_json::to_string_pretty(&report)?);

    Ok(())
}
