//! Cubemap face orientation and float read-back images.

use std::path::Path;

use bevy::math::{Vec2, Vec3, Vec4};

/// One face of a cubemap, in GPU layer order.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum CubeFace {
    PositiveX,
    NegativeX,
    PositiveY,
    NegativeY,
    PositiveZ,
    NegativeZ,
}

impl CubeFace {
    pub const ALL: [CubeFace; 6] = [
        CubeFace::PositiveX,
        CubeFace::NegativeX,
        CubeFace::PositiveY,
        CubeFace::NegativeY,
        CubeFace::PositiveZ,
        CubeFace::NegativeZ,
    ];

    pub fn layer(self) -> u32 {
        self as u32
    }

    /// Look direction and up vector of the capture camera for this face.
    pub fn orientation(self) -> (Vec3, Vec3) {
        match self {
            CubeFace::PositiveX => (Vec3::X, Vec3::NEG_Y),
            CubeFace::NegativeX => (Vec3::NEG_X, Vec3::NEG_Y),
            CubeFace::PositiveY => (Vec3::Y, Vec3::Z),
            CubeFace::NegativeY => (Vec3::NEG_Y, Vec3::NEG_Z),
            CubeFace::PositiveZ => (Vec3::Z, Vec3::NEG_Y),
            CubeFace::NegativeZ => (Vec3::NEG_Z, Vec3::NEG_Y),
        }
    }

    /// Unnormalised direction through face coordinates `uv` in [-1, 1],
    /// with +v towards the face's up vector.
    pub fn direction(self, uv: Vec2) -> Vec3 {
        let (forward, up) = self.orientation();
        let right = forward.cross(up);
        forward + right * uv.x + up * uv.y
    }
}

/// Linear float RGBA image, rows top to bottom.
#[derive(Clone, Debug, PartialEq)]
pub struct FloatImage {
    width: u32,
    height: u32,
    texels: Vec<[f32; 4]>,
}

impl FloatImage {
    pub fn new(width: u32, height: u32) -> Self {
        Self::filled(width, height, Vec4::ZERO)
    }

    pub fn filled(width: u32, height: u32, value: Vec4) -> Self {
        Self {
            width,
            height,
            texels: vec![value.to_array(); (width * height) as usize],
        }
    }

    /// Wrap tightly packed `f32` RGBA bytes. `None` on a size mismatch.
    pub fn from_rgba_bytes(width: u32, height: u32, bytes: &[u8]) -> Option<Self> {
        let expected = (width * height) as usize * std::mem::size_of::<[f32; 4]>();
        if bytes.len() != expected {
            return None;
        }
        Some(Self {
            width,
            height,
            texels: bytemuck::pod_collect_to_vec(bytes),
        })
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn pixel(&self, x: u32, y: u32) -> Vec3 {
        self.pixel_rgba(x, y).truncate()
    }

    pub fn pixel_rgba(&self, x: u32, y: u32) -> Vec4 {
        Vec4::from_array(self.texels[(y * self.width + x) as usize])
    }

    pub fn set_pixel(&mut self, x: u32, y: u32, value: Vec4) {
        let index = (y * self.width + x) as usize;
        self.texels[index] = value.to_array();
    }

    pub fn as_bytes(&self) -> &[u8] {
        bytemuck::cast_slice(&self.texels)
    }

    /// Write as 8-bit RGB PNG, clamping to [0, 1].
    pub fn save_png<P: AsRef<Path>>(&self, path: P) -> image::ImageResult<()> {
        let img = image::RgbImage::from_fn(self.width, self.height, |x, y| {
            let c = self.pixel(x, y).clamp(Vec3::ZERO, Vec3::ONE) * 255.0;
            image::Rgb([c.x.round() as u8, c.y.round() as u8, c.z.round() as u8])
        });
        img.save(path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bevy::math::Vec2;

    #[test]
    fn test_face_centres_match_look_direction() {
        for face in CubeFace::ALL {
            let (forward, up) = face.orientation();
            assert_eq!(face.direction(Vec2::ZERO), forward);
            assert!(forward.dot(up).abs() < 1e-6);
            // Face corners stay one unit off the centre on each axis.
            let corner = face.direction(Vec2::ONE) - forward;
            assert!(corner.dot(forward).abs() < 1e-6, "{face:?}");
            assert!((corner.dot(up) - 1.0).abs() < 1e-6, "{face:?}");
        }
    }

    #[test]
    fn test_bytes_round_trip() {
        let mut image = FloatImage::new(2, 2);
        image.set_pixel(1, 0, Vec4::new(1.0, 2.0, 3.0, 4.0));
        let copy = FloatImage::from_rgba_bytes(2, 2, image.as_bytes()).unwrap();
        assert_eq!(copy.pixel_rgba(1, 0), Vec4::new(1.0, 2.0, 3.0, 4.0));
        assert!(FloatImage::from_rgba_bytes(3, 2, image.as_bytes()).is_none());
    }

    #[test]
    fn test_save_png() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("face.png");
        FloatImage::filled(4, 4, Vec4::new(2.0, 0.5, 0.0, 1.0)).save_png(&path).unwrap();

        let loaded = image::open(&path).unwrap().to_rgb8();
        assert_eq!(loaded.dimensions(), (4, 4));
        assert_eq!(loaded.get_pixel(0, 0).0, [255, 128, 0]);
    }
}
