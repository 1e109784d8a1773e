use base64::Engine;
use serde_json::{json, Value};
use tracing::{debug, info};

use super::{payload_id, report, to_json, value_str, CommandResult};
use crate::scanner::camera::Frame;
use crate::scanner::{self, ScanMode};
use crate::state::{Action, Page};
use crate::AppContext;

const PRODUCT_KEYS: &[&str] = &["productId", "product_id", "id"];

/// Decode a captured still (PNG or JPEG, base64 or data URL) into a frame.
fn decode_frame(encoded: &str) -> Result<Frame, String> {
    let data = match encoded.split_once(";base64,") {
        Some((_, data)) => data,
        None => encoded,
    };
    let bytes = base64::engine::general_purpose::STANDARD
        .decode(data.trim())
        .map_err(|e| format!("Invalid frame encoding: {e}"))?;
    let image = image::load_from_memory(&bytes)
        .map_err(|e| format!("Unreadable frame: {e}"))?
        .to_rgb8();
    Frame::new(image.width(), image.height(), image.into_raw()).map_err(|e| e.to_string())
}

pub async fn scanner_get_state(ctx: &AppContext) -> CommandResult {
    to_json(&ctx.scanner.lock().await.view())
}

pub async fn scanner_set_mode(ctx: &AppContext, arg0: Option<Value>) -> CommandResult {
    let raw = value_str(arg0.as_ref(), &["mode"]).ok_or("Missing mode")?;
    let mode = ScanMode::parse(&raw).ok_or_else(|| format!("Unknown scan mode: {raw}"))?;
    let mut scanner = ctx.scanner.lock().await;
    scanner.set_mode(mode).await;
    to_json(&scanner.view())
}

pub async fn scanner_start(ctx: &AppContext) -> CommandResult {
    ctx.start_detection().await?;
    to_json(&ctx.scanner.lock().await.view())
}

pub async fn scanner_stop(ctx: &AppContext) -> CommandResult {
    let mut scanner = ctx.scanner.lock().await;
    scanner.stop_camera().await;
    to_json(&scanner.view())
}

pub async fn scanner_push_frame(ctx: &AppContext, arg0: Option<Value>) -> CommandResult {
    let encoded = value_str(arg0.as_ref(), &["image", "frame", "data"]).ok_or("Missing image")?;
    let frame = decode_frame(&encoded)?;
    let accepted = ctx.push_frame(frame);
    if !accepted {
        debug!("frame dropped, detection loop busy or stopped");
    }
    Ok(json!({ "accepted": accepted }))
}

/// Typed or hardware-scanned code; same path as a camera barcode.
pub async fn scanner_manual_lookup(ctx: &AppContext, arg0: Option<Value>) -> CommandResult {
    let code = value_str(arg0.as_ref(), &["code", "barcode", "sku"]).ok_or("Enter a code")?;
    let mut scanner = ctx.scanner.lock().await;
    let outcome = scanner
        .lookup_code(ctx.backend(), &code)
        .await
        .map_err(|e| report(ctx, "scanner_manual_lookup", e))?;
    to_json(&outcome)
}

pub async fn scanner_select_label(ctx: &AppContext, arg0: Option<Value>) -> CommandResult {
    let id = payload_id(arg0.as_ref(), PRODUCT_KEYS)?;
    let product = ctx
        .api
        .get_product(id)
        .await
        .map_err(|e| report(ctx, "scanner_select_label", e))?;
    to_json(&ctx.scanner.lock().await.select_label(product))
}

pub async fn scanner_identify(ctx: &AppContext) -> CommandResult {
    let outcome = scanner::identify(
        &ctx.scanner,
        ctx.backend(),
        ctx.vision.as_ref(),
        ctx.keys.as_ref(),
    )
    .await
    .map_err(|e| report(ctx, "scanner_identify", e.notification()))?;
    to_json(&outcome)
}

pub async fn scanner_clear_match(ctx: &AppContext) -> CommandResult {
    let mut scanner = ctx.scanner.lock().await;
    scanner.clear_match();
    to_json(&scanner.view())
}

/// Put the matched product into the draft order and switch to it.
pub async fn scanner_add_to_order(ctx: &AppContext) -> CommandResult {
    let mut scanner = ctx.scanner.lock().await;
    let product = scanner
        .current_match()
        .map(|m| m.product.clone())
        .ok_or("Nothing matched yet")?;
    scanner.clear_match();
    drop(scanner);

    let mut draft = ctx.draft.lock().await;
    draft.add_product(&product);
    info!(product_id = product.id, "scanned product added to draft");
    ctx.store.success(format!("{} added to order", product.name));
    ctx.store.dispatch(Action::Navigate(Page::Orders));
    to_json(&draft.view())
}

// ---------------------------------------------------------------------------
// AI key
// ---------------------------------------------------------------------------

pub async fn ai_key_status(ctx: &AppContext) -> CommandResult {
    Ok(json!({ "configured": ctx.keys.has_key() }))
}

pub async fn ai_key_save(ctx: &AppContext, arg0: Option<Value>) -> CommandResult {
    let key = value_str(arg0.as_ref(), &["key", "apiKey", "api_key"]).ok_or("Missing key")?;
    ctx.keys
        .save(&key)
        .map_err(|e| report(ctx, "ai_key_save", e))?;
    ctx.store.success("API key saved");
    Ok(json!({ "configured": true }))
}

pub async fn ai_key_clear(ctx: &AppContext) -> CommandResult {
    ctx.keys
        .clear()
        .map_err(|e| report(ctx, "ai_key_clear", e))?;
    ctx.store.success("API key removed");
    Ok(json!({ "configured": false }))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_frame_accepts_data_url() {
        let png = crate::scanner::qr::render_png("LDDROP:1:A:1").unwrap();
        let b64 = base64::engine::general_purpose::STANDARD.encode(&png);
        let frame = decode_frame(&format!("data:image/png;base64,{b64}")).unwrap();
        assert!(frame.width > 0);
        assert_eq!(frame.rgb.len(), (frame.width * frame.height * 3) as usize);
        assert!(decode_frame(&b64).is_ok());
    }

    #[test]
    fn test_decode_frame_rejects_garbage() {
        assert!(decode_frame("not base64 !!").unwrap_err().starts_with("Invalid frame"));
        let b64 = base64::engine::general_purpose::STANDARD.encode(b"plain text");
        assert!(decode_frame(&b64).unwrap_err().starts_with("Unreadable frame"));
    }
}
