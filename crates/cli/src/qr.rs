//! Terminal rendering of pairing codes.

use proto::PairingCode;
use qrcode::QrCode;
use qrcode::render::unicode;

/// Renders `data` as a QR code made of unicode half blocks, or `None` when
/// the payload does not fit in a QR code.
pub fn render_qr_text(data: &str) -> Option<String> {
    let code = QrCode::new(data.as_bytes()).ok()?;
    Some(
        code.render::<unicode::Dense1x2>()
            .dark_color(unicode::Dense1x2::Light)
            .light_color(unicode::Dense1x2::Dark)
            .quiet_zone(true)
            .build(),
    )
}

/// Full pairing prompt: QR block plus scan instructions.
pub fn pairing_prompt(code: &PairingCode) -> String {
    let body = render_qr_text(code.as_str())
        .unwrap_or_else(|| format!("QR data: {}", code.as_str()));
    format!(
        "{body}\n\nScan this QR code with WhatsApp on your phone.\n\
         (Open WhatsApp > Settings > Linked Devices > Link a Device)\n"
    )
}
