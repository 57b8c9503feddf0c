//! Grayscale PNG rendering of reconstructed grids.

use std::io::Cursor;
use std::path::{Path, PathBuf};

use image::{GrayImage, ImageFormat};

use guardian_types::{Grid, SPEC_HEIGHT, SPEC_WIDTH};

use crate::{HubError, Result};

/// Render a grid to PNG bytes.
pub fn render(grid: &Grid) -> Result<Vec<u8>> {
    let img = GrayImage::from_raw(
        SPEC_WIDTH as u32,
        SPEC_HEIGHT as u32,
        grid.as_slice().to_vec(),
    )
    .ok_or_else(|| HubError::Image("grid dimensions".into()))?;

    let mut bytes = Vec::new();
    img.write_to(&mut Cursor::new(&mut bytes), ImageFormat::Png)
        .map_err(|e| HubError::Image(e.to_string()))?;
    Ok(bytes)
}

/// Decode PNG bytes back to a grid (used by the sync worker when
/// re-classifying stored spectrograms).
pub fn decode(png: &[u8]) -> Result<Grid> {
    let img = image::load_from_memory_with_format(png, ImageFormat::Png)
        .map_err(|e| HubError::Image(e.to_string()))?
        .to_luma8();
    if img.width() as usize != SPEC_WIDTH || img.height() as usize != SPEC_HEIGHT {
        return Err(HubError::Image(format!(
            "unexpected dimensions {}x{}",
            img.width(),
            img.height()
        )));
    }
    Grid::from_vec(img.into_raw()).ok_or_else(|| HubError::Image("grid size".into()))
}

/// Write a spectrogram PNG under the spectrograms directory, named by its
/// record id. Returns the file path.
pub fn save(dir: &Path, id: i64, png: &[u8]) -> Result<PathBuf> {
    std::fs::create_dir_all(dir)?;
    let path = dir.join(format!("{id}.png"));
    std::fs::write(&path, png)?;
    Ok(path)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn gradient() -> Grid {
        let mut grid = Grid::new();
        for (i, px) in grid.as_mut_slice().iter_mut().enumerate() {
            *px = (i % 256) as u8;
        }
        grid
    }

    #[test]
    fn test_render_decode_roundtrip() {
        let grid = gradient();
        let png = render(&grid).expect("render");
        // PNG signature.
        assert_eq!(&png[..4], &[0x89, b'P', b'N', b'G']);
        let back = decode(&png).expect("decode");
        assert_eq!(back, grid);
    }

    #[test]
    fn test_decode_rejects_garbage() {
        assert!(decode(&[0u8; 16]).is_err());
    }

    #[test]
    fn test_save_names_by_id() {
        let dir = std::env::temp_dir().join("guardian-png-test");
        let png = render(&gradient()).expect("render");
        let path = save(&dir, 17, &png).expect("save");
        assert!(path.ends_with("17.png"));
        assert_eq!(std::fs::read(&path).expect("read"), png);
        let _ = std::fs::remove_dir_all(&dir);
    }
}
