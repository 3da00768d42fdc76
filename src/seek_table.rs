use crate::{Error, Result};

/// A position from which decoding can resume independently.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SeekPoint {
    pub logical_offset: u64,
    pub physical_offset: u64,
}

/// Seek points ordered by logical offset. Entry 0 always exists and maps
/// logical offset 0 to the end of the stream headers.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SeekPointTable {
    points: Vec<SeekPoint>,
}

impl SeekPointTable {
    pub fn new(header_end: u64) -> Self {
        Self {
            points: vec![SeekPoint {
                logical_offset: 0,
                physical_offset: header_end,
            }],
        }
    }

    pub(crate) fn from_points(points: Vec<SeekPoint>, header_end: u64) -> Result<Self> {
        let first = points.first().ok_or(Error::Corrupt("stream has no seek points"))?;
        if first.logical_offset != 0 || first.physical_offset != header_end {
            return Err(Error::Corrupt("root seek point mismatch"));
        }
        for pair in points.windows(2) {
            if pair[1].logical_offset <= pair[0].logical_offset
                || pair[1].physical_offset <= pair[0].physical_offset
            {
                return Err(Error::Corrupt("seek points not strictly increasing"));
            }
        }
        Ok(Self { points })
    }

    /// The greatest seek point at or before `logical_offset`.
    pub fn locate(&self, logical_offset: u64) -> SeekPoint {
        let upper = self
            .points
            .partition_point(|point| point.logical_offset <= logical_offset);
        // The root point satisfies the predicate for every offset.
        assert!(upper > 0, "seek point table lost its root entry");
        self.points[upper - 1]
    }

    pub fn append(&mut self, point: SeekPoint) {
        let last = self.last();
        assert!(
            point.logical_offset > last.logical_offset,
            "seek point logical offset {} not after {}",
            point.logical_offset,
            last.logical_offset
        );
        assert!(
            point.physical_offset > last.physical_offset,
            "seek point physical offset {} not after {}",
            point.physical_offset,
            last.physical_offset
        );
        self.points.push(point);
    }

    pub fn last(&self) -> SeekPoint {
        self.points[self.points.len() - 1]
    }

    pub fn points(&self) -> &[SeekPoint] {
        &self.points
    }

    /// Number of seek points, including the root entry.
    pub fn len(&self) -> usize {
        self.points.len()
    }

    /// Always `false`: the root entry exists from construction and loading
    /// rejects an empty footer.
    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }
}
