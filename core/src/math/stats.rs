pub struct VelocityMath;

impl VelocityMath {
    pub fn magnitude(east: f32, north: f32, vertical: f32) -> f32 {
        (east * east + north * north + vertical * vertical).sqrt()
    }

    /// Direction the flow is heading, degrees clockwise from north in `[0, 360)`.
    pub fn direction(east: f32, north: f32) -> f32 {
        let degrees = east.atan2(north).to_degrees();
        if degrees < 0.0 {
            degrees + 360.0
        } else {
            degrees
        }
    }
}
