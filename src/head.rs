// head.rs — mouse-driven stand-in for head tracking, yielding per-eye view matrices

use glam::{Mat4, Vec3};

use crate::stereo::{Eye, EyeKind};

pub struct HeadTracker {
    pub yaw: f32,
    pub pitch: f32,
    pub sensitivity_scale: f32,
    pub is_fullscreen: bool,
    /// Interpupillary distance in world units.
    ipd: f32,
}

impl HeadTracker {
    pub fn new(ipd: f32, sensitivity_scale: f32) -> Self {
        Self {
            yaw: 0.0,
            pitch: 0.0,
            sensitivity_scale,
            is_fullscreen: false,
            ipd,
        }
    }

    /// Turns the head by a cursor drag of `(dx, dy)` pixels across one eye's viewport,
    /// so content under the cursor follows it.
    pub fn drag(&mut self, dx: f32, dy: f32, eye_width: f32, eye_height: f32, fov_y_deg: f32) {
        if eye_width <= 0.0 || eye_height <= 0.0 {
            return;
        }

        let v_f = fov_y_deg.to_radians();
        let aspect = eye_width / eye_height;
        let h_f = 2.0 * ((v_f / 2.0).tan() * aspect).atan();

        let yaw_per_px_deg = (h_f / eye_width).to_degrees();
        let pitch_per_px_deg = (v_f / eye_height).to_degrees();

        self.yaw -= dx * yaw_per_px_deg * self.sensitivity_scale;
        self.pitch = (self.pitch - dy * pitch_per_px_deg * self.sensitivity_scale).clamp(-90.0, 90.0);
    }

    pub fn reset(&mut self) {
        self.yaw = 0.0;
        self.pitch = 0.0;
    }

    /// World-to-head transform: inverse of yaw-then-pitch head orientation.
    pub fn head_view(&self) -> Mat4 {
        Mat4::from_rotation_x(-self.pitch.to_radians()) * Mat4::from_rotation_y(-self.yaw.to_radians())
    }

    /// Left and right eye views, each offset by half the IPD.
    pub fn eyes(&self) -> [Eye; 2] {
        let head = self.head_view();
        let half = self.ipd / 2.0;
        [
            Eye {
                kind: EyeKind::Left,
                view: Mat4::from_translation(Vec3::new(half, 0.0, 0.0)) * head,
            },
            Eye {
                kind: EyeKind::Right,
                view: Mat4::from_translation(Vec3::new(-half, 0.0, 0.0)) * head,
            },
        ]
    }
}
