/// A decoder from tag tree bits to numbers in the 2d-array.
///
/// B.10.2 A tag tree is a way of representing a two-dimensional array of non-negative integers in
/// a hierarchical way. It successively creates reduced resolution levels of this two-dimensional
/// array, forming a tree. At every node of this tree the minimum integer of the (up to four) nodes
/// below it is recorded. Figure B.12 shows an example of this representation. The notation, qi(m,
/// n), is the value at the node that is mth from the left and nth from the top, at the ith level.
/// Level 0 is the lowest level of the tag tree; it contains the top node.
///
/// Values are decoded against a threshold: a query for a leaf reads bits until either the value of
/// every node on the path from the top node is known or is known to be at least the threshold.
/// Node state is written back after every bit, so a query interrupted by a failing bit source can
/// be repeated later and continues where it stopped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TagTreeDecoder {
    width: usize,
    height: usize,
    /// Levels from the leaves (index 0) up to the single top node.
    levels: Vec<Level>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct Level {
    width: usize,
    /// Lowest threshold the node is known to have reached.
    states: Vec<u32>,
    /// Value of the node, `UNKNOWN` until its terminating 1 bit is read.
    values: Vec<u32>,
}

const UNKNOWN: u32 = u32::MAX;

impl TagTreeDecoder {
    pub fn new(width: usize, height: usize) -> Self {
        let mut levels = Vec::new();
        let mut w = width.max(1);
        let mut h = height.max(1);
        // Determine depth by dividing out groups of 4
        loop {
            levels.push(Level {
                width: w,
                states: vec![0; w * h],
                values: vec![UNKNOWN; w * h],
            });
            if w == 1 && h == 1 {
                break;
            }
            w = w.div_ceil(2);
            h = h.div_ceil(2);
        }

        Self {
            width,
            height,
            levels,
        }
    }

    pub fn width(&self) -> usize {
        self.width
    }

    pub fn height(&self) -> usize {
        self.height
    }

    /// Number of levels including the leaves and the top node.
    pub fn depth(&self) -> usize {
        self.levels.len()
    }

    /// Forgets every bit decoded so far.
    pub fn reset(&mut self) {
        for level in &mut self.levels {
            level.states.fill(0);
            level.values.fill(UNKNOWN);
        }
    }

    /// Value of the leaf, if it is known.
    pub fn value(&self, row: usize, column: usize) -> Option<u32> {
        let value = self.levels[0].values[row * self.levels[0].width + column];
        (value != UNKNOWN).then_some(value)
    }

    /// Reads bits from `read_bit` until the leaf at (row, column) is known or
    /// known to be at least `threshold`, and returns its value or that lower
    /// bound.
    ///
    /// A returned value below `threshold` is exact. An error from `read_bit`
    /// leaves every bit read before it accounted for.
    pub fn decode<E, F>(
        &mut self,
        threshold: u32,
        row: usize,
        column: usize,
        mut read_bit: F,
    ) -> Result<u32, E>
    where
        F: FnMut() -> Result<bool, E>,
    {
        let mut minimum = 0;

        for depth in (0..self.levels.len()).rev() {
            let level = &mut self.levels[depth];
            let index = (row >> depth) * level.width + (column >> depth);

            if level.states[index] < minimum {
                level.states[index] = minimum;
            }

            while threshold > level.states[index] {
                if level.values[index] == UNKNOWN {
                    let bit = read_bit()?;
                    if bit {
                        level.values[index] = level.states[index];
                    }
                    level.states[index] += 1;
                } else {
                    // The value is known, it is below any higher threshold.
                    level.states[index] = threshold;
                    break;
                }
            }

            minimum = level.states[index].min(level.values[index]);
        }

        let leaf = &self.levels[0];
        let index = row * leaf.width + column;
        if leaf.values[index] != UNKNOWN {
            Ok(leaf.values[index])
        } else {
            Ok(leaf.states[index])
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bit_source(bits: &[u8]) -> impl FnMut() -> Result<bool, ()> + '_ {
        let mut position = 0;
        move || {
            let bit = *bits.get(position).ok_or(())?;
            position += 1;
            Ok(bit == 1)
        }
    }

    #[test]
    fn test_basic() {
        // Test basic tag tree from B.10.2
        let mut tt = TagTreeDecoder::new(6, 3);
        assert_eq!(4, tt.depth());

        let bits: &[u8] = &[
            0, 1, 1, 1, 1, // 0,0 = 1
            0, 0, 1, // 1,0 = 3
            1, 0, 1, // 2,0 = 2
            0, 0, 1, // 3,0 = 3
            1, 0, 1, 1, // 4,0 = 2
            0, 1, // 5,0 = 3
            0, 1, // 0,1 = 2
            0, 1, // 1,1 = 2
            1, // 2,1 = 1
            0, 0, 0, 1, // 3,1 = 4
            0, 1, // 4,1 = 3
            1, // 5,1 = 2
            0, 1, 1, // 0,2 = 2
            1, // 1,2 = 2
            0, 1, 1, // 2,2 = 2
            1, // 3,2 = 2
            1, 1, // 4,2 = 1
            0, 1, // 5,2 = 2
        ];
        let expected = [
            [1, 3, 2, 3, 2, 3],
            [2, 2, 1, 4, 3, 2],
            [2, 2, 2, 2, 1, 2],
        ];

        let mut read_bit = bit_source(bits);
        for (row, values) in expected.iter().enumerate() {
            for (column, value) in values.iter().enumerate() {
                assert_eq!(
                    tt.decode(UNKNOWN, row, column, &mut read_bit),
                    Ok(*value),
                    "leaf {},{}",
                    column,
                    row
                );
                assert_eq!(tt.value(row, column), Some(*value));
            }
        }
        assert_eq!(read_bit(), Err(()));
    }

    #[test]
    fn test_threshold_lower_bound() {
        let mut tt = TagTreeDecoder::new(1, 1);
        let bits: &[u8] = &[0, 0, 0, 1];
        let mut read_bit = bit_source(bits);

        // Each threshold step reads exactly one bit until the value is found.
        assert_eq!(tt.decode(1, 0, 0, &mut read_bit), Ok(1));
        assert_eq!(tt.value(0, 0), None);
        assert_eq!(tt.decode(2, 0, 0, &mut read_bit), Ok(2));
        assert_eq!(tt.decode(4, 0, 0, &mut read_bit), Ok(3));
        assert_eq!(tt.value(0, 0), Some(3));

        // Known values consume nothing at any threshold.
        assert_eq!(tt.decode(100, 0, 0, &mut read_bit), Ok(3));
        assert_eq!(tt.decode(1, 0, 0, &mut read_bit), Ok(3));
    }

    #[test]
    fn test_resume_after_failure() {
        let bits: &[u8] = &[0, 0, 1, 1, 0, 1];

        let mut whole = TagTreeDecoder::new(2, 1);
        let mut read_bit = bit_source(bits);
        let first = whole.decode(UNKNOWN, 0, 0, &mut read_bit);
        let second = whole.decode(UNKNOWN, 0, 1, &mut read_bit);

        // The same bits delivered one at a time, every failed query repeated.
        let mut pieces = TagTreeDecoder::new(2, 1);
        let mut results = Vec::new();
        let mut position = 0;
        let mut available = 0;
        for (row, column) in [(0, 0), (0, 1)] {
            loop {
                let mut read_bit = || {
                    if position < available {
                        position += 1;
                        Ok(bits[position - 1] == 1)
                    } else {
                        Err(())
                    }
                };
                match pieces.decode(UNKNOWN, row, column, &mut read_bit) {
                    Ok(value) => {
                        results.push(value);
                        break;
                    }
                    Err(()) => available += 1,
                }
            }
        }

        assert_eq!(position, bits.len());
        assert_eq!(vec![first.unwrap(), second.unwrap()], results);
    }

    #[test]
    fn test_reset() {
        let mut tt = TagTreeDecoder::new(2, 2);
        let mut read_bit = bit_source(&[1, 1]);
        assert_eq!(tt.decode(1, 1, 1, &mut read_bit), Ok(0));
        tt.reset();
        assert_eq!(tt.value(1, 1), None);
        let mut read_bit = bit_source(&[0, 1, 1]);
        assert_eq!(tt.decode(UNKNOWN, 1, 1, &mut read_bit), Ok(1));
    }
}
