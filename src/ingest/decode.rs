use crate::error::SkipReason;
use crate::models::{DecodedImage, ImageEntry};

/// Decode an archive member in memory. The raw payload is dropped afterwards.
pub fn decode_image(entry: ImageEntry) -> Result<DecodedImage, SkipReason> {
    let ImageEntry { entry, bytes } = entry;

    if bytes.is_empty() {
        return Err(SkipReason::Empty);
    }

    // Detect format from magic bytes rather than trusting the member name
    let format =
        image::guess_format(&bytes).map_err(|e| SkipReason::UnknownFormat(e.to_string()))?;

    let image = image::load_from_memory_with_format(&bytes, format)
        .map_err(|e| SkipReason::Decode(e.to_string()))?;

    if image.width() == 0 || image.height() == 0 {
        return Err(SkipReason::ZeroSized {
            width: image.width(),
            height: image.height(),
        });
    }

    Ok(DecodedImage {
        entry,
        image,
        format,
    })
}
