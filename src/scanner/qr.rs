//! LiveDrop product label payloads: `LDDROP:<productId>:<sku>:<price>`.
//!
//! Only the id is authoritative. The sku and price ride along so a label is
//! readable by a generic QR app, and the desk treats them as display hints.

use base64::Engine;
use image::{GrayImage, ImageEncoder, Luma};
use rxing::qrcode::QRCodeWriter;
use rxing::{BarcodeFormat, Writer};
use serde::Serialize;

use crate::format;
use crate::models::{Product, ProductId};

pub const PREFIX: &str = "LDDROP:";

/// Label QR edge length in pixels.
const LABEL_SIZE: u32 = 110;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct QrPayload {
    pub product_id: ProductId,
    pub sku: Option<String>,
    pub price: Option<f64>,
}

/// Parse a scanned value. Anything not in the LiveDrop scheme, or with a
/// non-numeric id, is rejected.
pub fn parse(raw: &str) -> Option<QrPayload> {
    let rest = raw.trim().strip_prefix(PREFIX)?;
    let (id, hints) = match rest.split_once(':') {
        Some((id, hints)) => (id, Some(hints)),
        None => (rest, None),
    };
    let product_id = id.trim().parse::<ProductId>().ok().filter(|id| *id > 0)?;

    // The sku may itself contain ':', so the price is whatever follows the
    // last separator.
    let (sku, price) = match hints.map(|h| h.rsplit_once(':')) {
        Some(Some((sku, price))) => (Some(sku), price.trim().parse::<f64>().ok()),
        Some(None) => (hints, None),
        None => (None, None),
    };

    Some(QrPayload {
        product_id,
        sku: sku.filter(|s| !s.is_empty()).map(str::to_string),
        price,
    })
}

pub fn encode(product: &Product) -> String {
    format!(
        "{PREFIX}{}:{}:{}",
        product.id,
        product.sku,
        format_price(product.price)
    )
}

fn format_price(price: f64) -> String {
    if price.fract() == 0.0 {
        format!("{price:.0}")
    } else {
        price.to_string()
    }
}

/// One cell of the printable label sheet.
#[derive(Debug, Clone, Serialize)]
pub struct Label {
    pub product_id: ProductId,
    pub name: String,
    pub sku: String,
    pub emoji: String,
    pub price: String,
    pub payload: String,
    /// PNG, base64. `None` when the encoder rejected the payload.
    pub qr_png: Option<String>,
}

pub fn label_sheet(products: &[Product]) -> Vec<Label> {
    products
        .iter()
        .map(|p| {
            let payload = encode(p);
            let qr_png = match render_png(&payload) {
                Ok(png) => Some(base64::engine::general_purpose::STANDARD.encode(png)),
                Err(e) => {
                    tracing::warn!(product_id = p.id, error = %e, "QR label render failed");
                    None
                }
            };
            Label {
                product_id: p.id,
                name: p.name.clone(),
                sku: p.sku.clone(),
                emoji: p.emoji.clone(),
                price: format::money(p.price),
                payload,
                qr_png,
            }
        })
        .collect()
}

/// Render `payload` as a black-on-white QR code PNG.
pub fn render_png(payload: &str) -> Result<Vec<u8>, String> {
    let matrix = QRCodeWriter
        .encode(payload, &BarcodeFormat::QR_CODE, LABEL_SIZE as _, LABEL_SIZE as _)
        .map_err(|e| e.to_string())?;
    let width = matrix.getWidth() as u32;
    let height = matrix.getHeight() as u32;
    let img = GrayImage::from_fn(width.max(1), height.max(1), |x, y| {
        if x < width && y < height && matrix.get(x as _, y as _) {
            Luma([0u8])
        } else {
            Luma([255u8])
        }
    });

    let mut png = Vec::new();
    image::codecs::png::PngEncoder::new(&mut png)
        .write_image(
            img.as_raw(),
            img.width(),
            img.height(),
            image::ExtendedColorType::L8,
        )
        .map_err(|e| e.to_string())?;
    Ok(png)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_resolves_id_only() {
        let payload = parse("LDDROP:42:SKU42:999").unwrap();
        assert_eq!(payload.product_id, 42);
        assert_eq!(payload.sku.as_deref(), Some("SKU42"));
        assert_eq!(payload.price, Some(999.0));
    }

    #[test]
    fn test_parse_rejects_foreign_codes() {
        assert!(parse("https://example.com/p/42").is_none());
        assert!(parse("LDDROP:abc:SKU:1").is_none());
        assert!(parse("LDDROP:").is_none());
        assert!(parse("lddrop:42:x:1").is_none());
    }

    #[test]
    fn test_parse_tolerates_missing_hints() {
        let payload = parse("LDDROP:7").unwrap();
        assert_eq!(payload.product_id, 7);
        assert_eq!(payload.sku, None);

        let payload = parse("LDDROP:7:AB:CD:12.5").unwrap();
        assert_eq!(payload.sku.as_deref(), Some("AB:CD"));
        assert_eq!(payload.price, Some(12.5));
    }

    #[test]
    fn test_encode_matches_label_scheme() {
        let product = Product {
            id: 42,
            sku: "SKU42".into(),
            price: 999.0,
            ..Default::default()
        };
        assert_eq!(encode(&product), "LDDROP:42:SKU42:999");
        assert_eq!(parse(&encode(&product)).unwrap().product_id, 42);
    }

    #[test]
    fn test_render_png_produces_png() {
        let png = render_png("LDDROP:1:MUG:350").unwrap();
        assert_eq!(&png[..4], b"\x89PNG");
    }
}
