/// Chooses which blocks to warm next.
///
/// `history` holds recent cursor/edit positions as block indices, oldest
/// first. The returned window is ordered by priority and must only contain
/// indices below `total_blocks`.
pub trait PredictionPolicy: Send + Sync {
	fn predict(&self, history: &[usize], current_block: usize, total_blocks: usize) -> Vec<usize>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Trend {
	Forward(usize),
	Backward(usize),
	Still,
}

/// Extrapolates the direction of recent movement.
///
/// When the last few distinct positions move strictly one way, the window
/// extends ahead in that direction, further the faster the user is moving,
/// plus one block behind. Without a clear trend it is a symmetric window
/// around the current block.
#[derive(Debug, Clone)]
pub struct TrendPolicy {
	/// Distinct positions considered when looking for a trend.
	pub lookback: usize,
	/// Half-width of the window when there is no trend.
	pub radius: usize,
	/// Blocks ahead predicted at velocity 1.
	pub lookahead: usize,
	/// Upper bound on the per-step velocity used to widen the window.
	pub max_velocity: usize,
}

impl Default for TrendPolicy {
	fn default() -> Self {
		Self {
			lookback: 4,
			radius: 2,
			lookahead: 3,
			max_velocity: 4,
		}
	}
}

impl TrendPolicy {
	fn trend(&self, history: &[usize]) -> Trend {
		let mut recent: Vec<usize> = Vec::with_capacity(self.lookback);
		for &pos in history.iter().rev() {
			if recent.last() != Some(&pos) {
				recent.push(pos);
				if recent.len() == self.lookback {
					break;
				}
			}
		}
		recent.reverse();

		if recent.len() < 2 {
			return Trend::Still;
		}
		let steps = recent.len() - 1;
		let (first, last) = (recent[0], recent[steps]);
		if recent.windows(2).all(|w| w[1] > w[0]) {
			Trend::Forward(self.velocity(last - first, steps))
		} else if recent.windows(2).all(|w| w[1] < w[0]) {
			Trend::Backward(self.velocity(first - last, steps))
		} else {
			Trend::Still
		}
	}

	fn velocity(&self, distance: usize, steps: usize) -> usize {
		distance.div_ceil(steps).clamp(1, self.max_velocity.max(1))
	}
}

impl PredictionPolicy for TrendPolicy {
	fn predict(&self, history: &[usize], current_block: usize, total_blocks: usize) -> Vec<usize> {
		if total_blocks == 0 {
			return Vec::new();
		}
		let current = current_block.min(total_blocks - 1);
		let ahead = |d: usize| Some(current + d).filter(|&i| i < total_blocks);
		let behind = |d: usize| current.checked_sub(d);

		let mut window = Vec::new();
		match self.trend(history) {
			Trend::Forward(velocity) => {
				window.extend((1..self.lookahead + velocity).filter_map(ahead));
				window.extend(behind(1));
			}
			Trend::Backward(velocity) => {
				window.extend((1..self.lookahead + velocity).filter_map(behind));
				window.extend(ahead(1));
			}
			Trend::Still => {
				for d in 1..=self.radius {
					window.extend(ahead(d));
					window.extend(behind(d));
				}
			}
		}
		window
	}
}
