// Record schema of a scene archive
//
// Four arrays, linked by half-open index intervals:
//
//   scenes[i].frame_index_interval               -> frames[a..b]
//   frames[j].agent_index_interval               -> agents[c..d]
//   frames[j].traffic_light_faces_index_interval -> traffic_light_faces[e..f]
//
// Decoding goes through field names, so archives written with a different
// field order or numeric widths still load. Encoding always produces the
// canonical dtypes below.

use motion_core::Result;

use crate::dtype::{
    put_f32, put_f64, put_i64, put_u64, put_unicode, RecordDtype, RecordView, ScalarType,
};

/// Perception labels, in the order of `Agent::label_probabilities`.
pub const PERCEPTION_LABELS: [&str; 17] = [
    "PERCEPTION_LABEL_NOT_SET",
    "PERCEPTION_LABEL_UNKNOWN",
    "PERCEPTION_LABEL_DONTCARE",
    "PERCEPTION_LABEL_CAR",
    "PERCEPTION_LABEL_VAN",
    "PERCEPTION_LABEL_TRAM",
    "PERCEPTION_LABEL_BUS",
    "PERCEPTION_LABEL_TRUCK",
    "PERCEPTION_LABEL_EMERGENCY_VEHICLE",
    "PERCEPTION_LABEL_OTHER_VEHICLE",
    "PERCEPTION_LABEL_BICYCLE",
    "PERCEPTION_LABEL_MOTORCYCLE",
    "PERCEPTION_LABEL_CYCLIST",
    "PERCEPTION_LABEL_MOTORCYCLIST",
    "PERCEPTION_LABEL_PEDESTRIAN",
    "PERCEPTION_LABEL_ANIMAL",
    "AVRESEARCH_LABEL_DONTCARE",
];

/// Index of the first label that names a real road user; the three before
/// it (not set, unknown, don't care) never count towards agent filtering.
pub const FIRST_KNOWN_LABEL: usize = 3;

/// Index of `PERCEPTION_LABEL_CAR`.
pub const CAR_LABEL: usize = 3;

/// Traffic light face states, in the order of `traffic_light_face_status`.
pub const TL_FACE_LABELS: [&str; 3] = ["ACTIVE", "INACTIVE", "UNKNOWN"];

/// Width of the fixed-length text fields (host, face ids).
pub const ID_CHARS: usize = 16;

/// Ego vehicle extent in metres (length, width, height).
pub const EGO_EXTENT: [f32; 3] = [4.869, 1.852, 1.473];

/// A typed row of one of the archive arrays.
pub trait Record: Sized + Clone + Send + Sync {
    /// Name of the array directory inside the archive.
    const ARRAY: &'static str;

    /// The dtype written by [`Record::encode`].
    fn dtype() -> RecordDtype;

    /// Decode one record from a view on the file's own dtype.
    fn decode(view: RecordView<'_>) -> Result<Self>;

    /// Append the canonical encoding of `self` to `out`.
    fn encode(&self, out: &mut Vec<u8>);
}

/// A contiguous recording session.
#[derive(Debug, Clone, PartialEq)]
pub struct Scene {
    pub frame_index_interval: [i64; 2],
    pub host: String,
    pub start_time: i64,
    pub end_time: i64,
}

impl Scene {
    pub fn frame_range(&self) -> std::ops::Range<usize> {
        self.frame_index_interval[0] as usize..self.frame_index_interval[1] as usize
    }

    pub fn num_frames(&self) -> usize {
        self.frame_range().len()
    }
}

impl Record for Scene {
    const ARRAY: &'static str = "scenes";

    fn dtype() -> RecordDtype {
        RecordDtype::new(vec![
            ("frame_index_interval", ScalarType::I64, vec![2]),
            ("host", ScalarType::unicode(ID_CHARS), vec![]),
            ("start_time", ScalarType::I64, vec![]),
            ("end_time", ScalarType::I64, vec![]),
        ])
    }

    fn decode(view: RecordView<'_>) -> Result<Self> {
        Ok(Scene {
            frame_index_interval: view.i64_array("frame_index_interval")?,
            host: view.string("host")?,
            start_time: view.i64("start_time")?,
            end_time: view.i64("end_time")?,
        })
    }

    fn encode(&self, out: &mut Vec<u8>) {
        put_i64(out, self.frame_index_interval[0]);
        put_i64(out, self.frame_index_interval[1]);
        put_unicode(out, &self.host, ID_CHARS);
        put_i64(out, self.start_time);
        put_i64(out, self.end_time);
    }
}

/// One timestep of a scene: ego pose plus the agents and lights seen.
#[derive(Debug, Clone, PartialEq)]
pub struct Frame {
    /// Nanoseconds since epoch.
    pub timestamp: i64,
    pub agent_index_interval: [i64; 2],
    pub traffic_light_faces_index_interval: [i64; 2],
    pub ego_translation: [f64; 3],
    pub ego_rotation: [[f64; 3]; 3],
}

impl Frame {
    pub fn agent_range(&self) -> std::ops::Range<usize> {
        self.agent_index_interval[0] as usize..self.agent_index_interval[1] as usize
    }

    pub fn tl_face_range(&self) -> std::ops::Range<usize> {
        self.traffic_light_faces_index_interval[0] as usize
            ..self.traffic_light_faces_index_interval[1] as usize
    }

    pub fn ego_yaw(&self) -> f64 {
        motion_core::geometry::yaw_from_rotation(&self.ego_rotation)
    }

    pub fn ego_position(&self) -> [f64; 2] {
        [self.ego_translation[0], self.ego_translation[1]]
    }
}

impl Record for Frame {
    const ARRAY: &'static str = "frames";

    fn dtype() -> RecordDtype {
        RecordDtype::new(vec![
            ("timestamp", ScalarType::I64, vec![]),
            ("agent_index_interval", ScalarType::I64, vec![2]),
            ("traffic_light_faces_index_interval", ScalarType::I64, vec![2]),
            ("ego_translation", ScalarType::F64, vec![3]),
            ("ego_rotation", ScalarType::F64, vec![3, 3]),
        ])
    }

    fn decode(view: RecordView<'_>) -> Result<Self> {
        let r: [f64; 9] = view.f64_array("ego_rotation")?;
        Ok(Frame {
            timestamp: view.i64("timestamp")?,
            agent_index_interval: view.i64_array("agent_index_interval")?,
            traffic_light_faces_index_interval: view
                .i64_array("traffic_light_faces_index_interval")?,
            ego_translation: view.f64_array("ego_translation")?,
            ego_rotation: [[r[0], r[1], r[2]], [r[3], r[4], r[5]], [r[6], r[7], r[8]]],
        })
    }

    fn encode(&self, out: &mut Vec<u8>) {
        put_i64(out, self.timestamp);
        for v in self.agent_index_interval {
            put_i64(out, v);
        }
        for v in self.traffic_light_faces_index_interval {
            put_i64(out, v);
        }
        for v in self.ego_translation {
            put_f64(out, v);
        }
        for row in self.ego_rotation {
            for v in row {
                put_f64(out, v);
            }
        }
    }
}

/// A perceived road user in one frame.
#[derive(Debug, Clone, PartialEq)]
pub struct Agent {
    pub centroid: [f64; 2],
    /// Length, width, height in metres.
    pub extent: [f32; 3],
    pub yaw: f32,
    pub velocity: [f32; 2],
    /// Stable within a scene; 0 is never a valid track.
    pub track_id: u64,
    pub label_probabilities: [f32; 17],
}

impl Agent {
    /// Best probability among real road-user labels.
    pub fn known_label_probability(&self) -> f32 {
        self.label_probabilities[FIRST_KNOWN_LABEL..]
            .iter()
            .copied()
            .fold(0.0, f32::max)
    }

    /// Whether the agent survives a label threshold.
    pub fn passes_threshold(&self, threshold: f64) -> bool {
        self.known_label_probability() as f64 > threshold
    }

    /// The ego vehicle of `frame` expressed as an agent.
    pub fn ego(frame: &Frame) -> Self {
        let mut label_probabilities = [0.0; 17];
        label_probabilities[CAR_LABEL] = 1.0;
        Agent {
            centroid: frame.ego_position(),
            extent: EGO_EXTENT,
            yaw: frame.ego_yaw() as f32,
            velocity: [0.0, 0.0],
            track_id: 0,
            label_probabilities,
        }
    }
}

impl Record for Agent {
    const ARRAY: &'static str = "agents";

    fn dtype() -> RecordDtype {
        RecordDtype::new(vec![
            ("centroid", ScalarType::F64, vec![2]),
            ("extent", ScalarType::F32, vec![3]),
            ("yaw", ScalarType::F32, vec![]),
            ("velocity", ScalarType::F32, vec![2]),
            ("track_id", ScalarType::U64, vec![]),
            (
                "label_probabilities",
                ScalarType::F32,
                vec![PERCEPTION_LABELS.len()],
            ),
        ])
    }

    fn decode(view: RecordView<'_>) -> Result<Self> {
        let extent: [f64; 3] = view.f64_array("extent")?;
        let velocity: [f64; 2] = view.f64_array("velocity")?;
        let labels: [f64; 17] = view.f64_array("label_probabilities")?;
        Ok(Agent {
            centroid: view.f64_array("centroid")?,
            extent: extent.map(|v| v as f32),
            yaw: view.f64("yaw")? as f32,
            velocity: velocity.map(|v| v as f32),
            track_id: view.u64("track_id")?,
            label_probabilities: labels.map(|v| v as f32),
        })
    }

    fn encode(&self, out: &mut Vec<u8>) {
        for v in self.centroid {
            put_f64(out, v);
        }
        for v in self.extent {
            put_f32(out, v);
        }
        put_f32(out, self.yaw);
        for v in self.velocity {
            put_f32(out, v);
        }
        put_u64(out, self.track_id);
        for v in self.label_probabilities {
            put_f32(out, v);
        }
    }
}

/// State of one traffic light face in one frame.
#[derive(Debug, Clone, PartialEq)]
pub struct TrafficLightFace {
    pub face_id: String,
    pub traffic_light_id: String,
    pub traffic_light_face_status: [f32; 3],
}

impl Record for TrafficLightFace {
    const ARRAY: &'static str = "traffic_light_faces";

    fn dtype() -> RecordDtype {
        RecordDtype::new(vec![
            ("face_id", ScalarType::unicode(ID_CHARS), vec![]),
            ("traffic_light_id", ScalarType::unicode(ID_CHARS), vec![]),
            (
                "traffic_light_face_status",
                ScalarType::F32,
                vec![TL_FACE_LABELS.len()],
            ),
        ])
    }

    fn decode(view: RecordView<'_>) -> Result<Self> {
        let status: [f64; 3] = view.f64_array("traffic_light_face_status")?;
        Ok(TrafficLightFace {
            face_id: view.string("face_id")?,
            traffic_light_id: view.string("traffic_light_id")?,
            traffic_light_face_status: status.map(|v| v as f32),
        })
    }

    fn encode(&self, out: &mut Vec<u8>) {
        put_unicode(out, &self.face_id, ID_CHARS);
        put_unicode(out, &self.traffic_light_id, ID_CHARS);
        for v in self.traffic_light_face_status {
            put_f32(out, v);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_canonical_itemsizes() {
        assert_eq!(Scene::dtype().itemsize(), 16 + 64 + 8 + 8);
        assert_eq!(Frame::dtype().itemsize(), 8 + 16 + 16 + 24 + 72);
        assert_eq!(Agent::dtype().itemsize(), 16 + 12 + 4 + 8 + 8 + 68);
        assert_eq!(TrafficLightFace::dtype().itemsize(), 64 + 64 + 12);
    }

    #[test]
    fn test_agent_encode_decode() {
        let mut labels = [0.0; 17];
        labels[CAR_LABEL] = 0.9;
        let agent = Agent {
            centroid: [10.5, -3.25],
            extent: [4.0, 1.8, 1.5],
            yaw: 0.3,
            velocity: [1.0, 0.5],
            track_id: 42,
            label_probabilities: labels,
        };
        let mut buf = Vec::new();
        agent.encode(&mut buf);
        let dtype = Agent::dtype();
        assert_eq!(buf.len(), dtype.itemsize());
        let back = Agent::decode(RecordView::new(&dtype, &buf)).unwrap();
        assert_eq!(back, agent);
        assert!(back.passes_threshold(0.5));
        assert!(!back.passes_threshold(0.95));
    }

    #[test]
    fn test_unknown_labels_do_not_pass() {
        let mut labels = [0.0; 17];
        labels[1] = 1.0; // PERCEPTION_LABEL_UNKNOWN
        let agent = Agent {
            centroid: [0.0, 0.0],
            extent: [1.0, 1.0, 1.0],
            yaw: 0.0,
            velocity: [0.0, 0.0],
            track_id: 1,
            label_probabilities: labels,
        };
        assert_eq!(agent.known_label_probability(), 0.0);
        assert!(!agent.passes_threshold(0.0));
    }
}
