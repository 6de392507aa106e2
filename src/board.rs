//! Authoritative per-player board simulation. Ported from
//! `original_source/Source/tetrad.h` (piece generation and rotation) and
//! `original_source/trisboard.h` (gravity, locking, line clears, scoring).

use rand::seq::SliceRandom;
use rand::Rng;

pub const MIN_WIDTH: u8 = 4;
pub const MAX_WIDTH: u8 = 20;
pub const DEFAULT_WIDTH: u8 = 10;
pub const MIN_HEIGHT: u8 = 6;
pub const MAX_HEIGHT: u8 = 30;
pub const DEFAULT_HEIGHT: u8 = 22;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Face {
    I = 0,
    O = 1,
    L = 2,
    J = 3,
    S = 4,
    Z = 5,
    T = 6,
}

impl Face {
    const ALL: [Face; 7] = [Face::I, Face::O, Face::L, Face::J, Face::S, Face::Z, Face::T];

    fn from_index(n: u8) -> Face {
        Self::ALL[n as usize % 7]
    }
}

impl TryFrom<u8> for Face {
    type Error = ();

    fn try_from(n: u8) -> Result<Self, Self::Error> {
        Ok(match n {
            0 => Face::I,
            1 => Face::O,
            2 => Face::L,
            3 => Face::J,
            4 => Face::S,
            5 => Face::Z,
            6 => Face::T,
            _ => return Err(()),
        })
    }
}

/// A falling piece: its shape and the four grid cells it currently
/// occupies. `cells[0]` is the pivot used by rotation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ActivePiece {
    pub face: Face,
    pub cells: [(i32, i32); 4],
}

impl ActivePiece {
    /// Spawn coordinates taken verbatim from `cTetrad::generateI..generateT`:
    /// column `width/2 - 1`, row `height - 2`, with per-shape unit offsets.
    fn spawn(face: Face, width: u8, height: u8) -> Self {
        let x = width as i32 / 2 - 1;
        let y = height as i32 - 2;
        let cells = match face {
            Face::I => [(x, y), (x - 1, y), (x + 1, y), (x + 2, y)],
            Face::O => [(x, y), (x + 1, y), (x, y + 1), (x + 1, y + 1)],
            Face::L => [(x, y), (x - 1, y), (x + 1, y), (x + 1, y + 1)],
            Face::J => [(x, y), (x - 1, y), (x + 1, y), (x - 1, y + 1)],
            Face::S => [(x, y), (x - 1, y), (x, y + 1), (x + 1, y + 1)],
            Face::Z => [(x, y), (x + 1, y), (x, y + 1), (x - 1, y + 1)],
            Face::T => [(x, y), (x - 1, y), (x + 1, y), (x, y + 1)],
        };
        Self { face, cells }
    }

    fn translated(&self, dx: i32, dy: i32) -> Self {
        let mut next = *self;
        for cell in next.cells.iter_mut() {
            cell.0 += dx;
            cell.1 += dy;
        }
        next
    }

    /// `rotateRight` from `tetrad.h`. `O` never rotates; `I` performs a
    /// translate (`cTranslateI`) before the same clockwise offset swap
    /// every other shape uses, rotating around `cells[0]`.
    fn rotated_cw(&self) -> Self {
        if self.face == Face::O {
            return *self;
        }
        let mut next = if self.face == Face::I { self.translate_i_cw() } else { *self };
        let (px, py) = next.cells[0];
        for cell in next.cells[1..].iter_mut() {
            let (dx, dy) = (cell.0 - px, cell.1 - py);
            *cell = (px + dy, py - dx);
        }
        next
    }

    fn rotated_ccw(&self) -> Self {
        if self.face == Face::O {
            return *self;
        }
        let mut next = if self.face == Face::I { self.translate_i_ccw() } else { *self };
        let (px, py) = next.cells[0];
        for cell in next.cells[1..].iter_mut() {
            let (dx, dy) = (cell.0 - px, cell.1 - py);
            *cell = (px - dy, py + dx);
        }
        next
    }

    // `cTranslateI`: the I piece is long enough that clockwise and
    // counterclockwise rotations need a pre-shift of all four cells,
    // direction depending on whether the piece currently lies flat or
    // upright (inferred from cells[1]'s offset from the pivot).
    fn translate_i_cw(&self) -> Self {
        let (px, py) = self.cells[0];
        let (ox, oy) = (self.cells[1].0 - px, self.cells[1].1 - py);
        if oy == 0 {
            self.translated(-ox, 0)
        } else if ox == 0 {
            self.translated(0, -oy)
        } else {
            *self
        }
    }

    fn translate_i_ccw(&self) -> Self {
        let (px, py) = self.cells[0];
        let (ox, oy) = (self.cells[1].0 - px, self.cells[1].1 - py);
        if oy == 0 {
            self.translated(0, ox)
        } else if ox == 0 {
            self.translated(-oy, 0)
        } else {
            *self
        }
    }
}

/// Authoritative falling-block board for one player.
pub struct Board {
    width: u8,
    height: u8,
    cells: Vec<Option<Face>>,
    active: Option<ActivePiece>,
    upcoming: Option<Face>,
    next_queue: [Face; 7],
    draw_index: usize,
    permute: bool,
    level: u32,
    remaining: i32,
    clears: [u32; 4],
    score: u64,
    topped_out: bool,
}

impl Board {
    pub fn new(width: u8, height: u8, permute: bool, level: u32) -> Self {
        let width = width.clamp(MIN_WIDTH, MAX_WIDTH);
        let height = height.clamp(MIN_HEIGHT, MAX_HEIGHT);
        Self {
            width,
            height,
            cells: vec![None; width as usize * height as usize],
            active: None,
            upcoming: None,
            next_queue: [Face::I; 7],
            draw_index: 0,
            permute,
            level,
            remaining: (level as i32 * 10).clamp(10, 100),
            clears: [0; 4],
            score: 0,
            topped_out: false,
        }
    }

    pub fn width(&self) -> u8 {
        self.width
    }

    pub fn height(&self) -> u8 {
        self.height
    }

    pub fn level(&self) -> u32 {
        self.level
    }

    pub fn score(&self) -> u64 {
        self.score
    }

    pub fn clears(&self) -> [u32; 4] {
        self.clears
    }

    pub fn top_out(&self) -> bool {
        self.topped_out
    }

    pub fn active(&self) -> Option<&ActivePiece> {
        self.active.as_ref()
    }

    pub fn next_queue(&self) -> &[Face; 7] {
        &self.next_queue
    }

    pub fn cell(&self, x: u8, y: u8) -> Option<Face> {
        self.cells[self.index(x, y)]
    }

    pub fn cells(&self) -> impl Iterator<Item = (u8, u8, Option<Face>)> + '_ {
        (0..self.height).flat_map(move |y| (0..self.width).map(move |x| (x, y, self.cell(x, y))))
    }

    fn index(&self, x: u8, y: u8) -> usize {
        y as usize * self.width as usize + x as usize
    }

    fn redraw_queue(&mut self) {
        if self.permute {
            let mut bag = Face::ALL;
            bag.shuffle(&mut rand::thread_rng());
            self.next_queue = bag;
        } else {
            let mut rng = rand::thread_rng();
            for slot in self.next_queue.iter_mut() {
                *slot = Face::from_index(rng.gen_range(0..7));
            }
        }
    }

    /// Resets the board and primes the bag, as `cTrisBoard::start`/
    /// `primeTetrads` do.
    pub fn start(&mut self) {
        self.cells.iter_mut().for_each(|c| *c = None);
        self.score = 0;
        self.clears = [0; 4];
        self.remaining = (self.level as i32 * 10).clamp(10, 100);
        self.topped_out = false;
        self.redraw_queue();
        self.active = Some(ActivePiece::spawn(self.next_queue[0], self.width, self.height));
        self.upcoming = Some(self.next_queue[1]);
        self.draw_index = 2;
    }

    /// Advances the active piece from the queue, redrawing the bag when
    /// it has been fully consumed (`cTrisBoard::nextTetrad`).
    pub fn next_piece(&mut self) {
        self.active = self.upcoming.map(|face| ActivePiece::spawn(face, self.width, self.height));
        if self.draw_index >= 7 {
            self.redraw_queue();
            self.draw_index = 0;
        }
        self.upcoming = Some(self.next_queue[self.draw_index]);
        self.draw_index += 1;
    }

    fn fits(&self, piece: &ActivePiece) -> bool {
        piece.cells.iter().all(|&(x, y)| {
            x >= 0
                && y >= 0
                && x < self.width as i32
                && y < self.height as i32
                && self.cell(x as u8, y as u8).is_none()
        })
    }

    pub fn move_left(&mut self) -> bool {
        self.try_shift(-1, 0)
    }

    pub fn move_right(&mut self) -> bool {
        self.try_shift(1, 0)
    }

    fn try_shift(&mut self, dx: i32, dy: i32) -> bool {
        let Some(active) = self.active else { return false };
        let candidate = active.translated(dx, dy);
        if self.fits(&candidate) {
            self.active = Some(candidate);
            true
        } else {
            false
        }
    }

    pub fn rotate_left(&mut self) -> bool {
        self.try_rotate(false)
    }

    pub fn rotate_right(&mut self) -> bool {
        self.try_rotate(true)
    }

    fn try_rotate(&mut self, clockwise: bool) -> bool {
        let Some(active) = self.active else { return false };
        let candidate = if clockwise { active.rotated_cw() } else { active.rotated_ccw() };
        if self.fits(&candidate) {
            self.active = Some(candidate);
            true
        } else {
            false
        }
    }

    /// `moveDown`: one soft-drop step, with the manual-drop score bonus
    /// `forceDown` doesn't apply. Returns `true` if the piece locked.
    pub fn move_down(&mut self) -> bool {
        if self.active.is_some() {
            self.score += 1;
        }
        self.force_down()
    }

    /// `forceDown`: gravity/auto-drop step with no scoring side effect.
    /// Returns `true` if the piece locked this step.
    pub fn force_down(&mut self) -> bool {
        let Some(active) = self.active else { return false };
        let candidate = active.translated(0, -1);
        if self.fits(&candidate) {
            self.active = Some(candidate);
            false
        } else {
            self.lock_active();
            true
        }
    }

    /// `sonicLock`: repeats `moveDown` until the piece locks. Drop score
    /// is doubled during sonic lock, per the original's extra per-step
    /// bonus, plus one final bonus point once locked.
    pub fn sonic_lock(&mut self) {
        while !self.move_down() {
            self.score += 1;
        }
        self.score += 1;
    }

    fn lock_active(&mut self) {
        let Some(active) = self.active.take() else { return };
        for &(x, y) in &active.cells {
            let idx = self.index(x as u8, y as u8);
            self.cells[idx] = Some(active.face);
        }
        self.clear_lines();
        self.topped_out |= self.check_overflow();
        if !self.topped_out {
            self.next_piece();
        }
    }

    fn check_overflow(&self) -> bool {
        let top = self.height.saturating_sub(2);
        (top..self.height).any(|y| (0..self.width).any(|x| self.cell(x, y).is_some()))
    }

    fn row_full(&self, y: u8) -> bool {
        (0..self.width).all(|x| self.cell(x, y).is_some())
    }

    fn clear_row(&mut self, y: u8) {
        for row in y..self.height - 1 {
            for x in 0..self.width {
                let below = self.index(x, row);
                let above = self.index(x, row + 1);
                self.cells[below] = self.cells[above];
            }
        }
        let top = self.index(0, self.height - 1);
        for x in 0..self.width as usize {
            self.cells[top + x] = None;
        }
    }

    /// `clearLines`: bottom-up scan, shifting rows down per clear, then
    /// scores and advances the level according to how many lines cleared
    /// at once.
    pub fn clear_lines(&mut self) -> u32 {
        let mut cleared = 0u32;
        let mut y = 0u8;
        while y < self.height {
            if self.row_full(y) {
                self.clear_row(y);
                cleared += 1;
            } else {
                y += 1;
            }
        }
        if cleared > 0 {
            self.clears[(cleared - 1) as usize] += 1;
            self.line_score(cleared);
            self.level_check(cleared);
        }
        cleared
    }

    fn line_score(&mut self, lines: u32) {
        let base = match lines {
            1 => 40,
            2 => 100,
            3 => 300,
            _ => 1200,
        };
        self.score += base * (self.level as u64 + 1);
    }

    fn level_check(&mut self, lines: u32) {
        self.remaining -= lines as i32;
        if self.remaining < 1 {
            self.remaining += 10;
            self.level += 1;
        }
    }

    /// `BTSLock`: applies a client-submitted placement directly, used by
    /// the server in place of running its own gravity loop. Checks all
    /// four target cells before committing any of them; returns `true`
    /// (inconsistent) without mutating the board if any cell is already
    /// occupied.
    pub fn apply_lock(&mut self, face: Face, cells: [(u8, u8); 4]) -> bool {
        let occupied = cells.iter().any(|&(x, y)| {
            x >= self.width || y >= self.height || self.cell(x, y).is_some()
        });
        if occupied {
            return true;
        }
        for &(x, y) in &cells {
            let idx = self.index(x, y);
            self.cells[idx] = Some(face);
        }
        self.clear_lines();
        self.topped_out |= self.check_overflow();
        if !self.topped_out {
            self.next_piece();
        }
        false
    }

    /// `BTDropInterval`: `(2.2 - level^(1/4.5)) * 1000` milliseconds,
    /// clamped so the interval never goes negative past level 20.
    pub fn drop_interval_ms(level: u32) -> u64 {
        let level = level.min(20) as f64;
        let seconds = 2.2 - level.powf(1.0 / 4.5);
        (seconds.max(0.05) * 1000.0) as u64
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn start_spawns_first_two_pieces_from_bag() {
        let mut board = Board::new(DEFAULT_WIDTH, DEFAULT_HEIGHT, true, 0);
        board.start();
        assert!(board.active().is_some());
        assert_eq!(board.next_queue()[0], board.active().unwrap().face);
    }

    #[test]
    fn s_and_z_spawn_shapes_are_not_swapped() {
        let s = ActivePiece::spawn(Face::S, DEFAULT_WIDTH, DEFAULT_HEIGHT);
        let z = ActivePiece::spawn(Face::Z, DEFAULT_WIDTH, DEFAULT_HEIGHT);
        let (x, y) = s.cells[0];
        assert_eq!(s.cells, [(x, y), (x - 1, y), (x, y + 1), (x + 1, y + 1)]);
        assert_eq!(z.cells, [(x, y), (x + 1, y), (x, y + 1), (x - 1, y + 1)]);
    }

    #[test]
    fn top_out_flag_stays_set_after_the_overflowing_row_later_clears() {
        let mut board = Board::new(4, MIN_HEIGHT, true, 0);
        let top = board.height() - 1;

        // three of four columns in the top row: overflow is detected but
        // the row isn't complete yet, so nothing clears this step.
        let inconsistent = board.apply_lock(Face::T, [(0, top), (1, top), (2, top), (0, 0)]);
        assert!(!inconsistent);
        assert!(board.top_out());

        // completing that same row clears it, which would make a fresh
        // `check_overflow` scan come back empty; the flag must stay set.
        let inconsistent = board.apply_lock(Face::I, [(3, top), (1, 0), (2, 0), (3, 0)]);
        assert!(!inconsistent);
        assert!(board.top_out());
    }

    #[test]
    fn bag_redraw_is_a_permutation_of_all_seven_faces() {
        let mut board = Board::new(DEFAULT_WIDTH, DEFAULT_HEIGHT, true, 0);
        board.redraw_queue();
        let mut faces: Vec<u8> = board.next_queue().iter().map(|f| *f as u8).collect();
        faces.sort_unstable();
        assert_eq!(faces, vec![0, 1, 2, 3, 4, 5, 6]);
    }

    #[test]
    fn o_piece_never_rotates() {
        let piece = ActivePiece::spawn(Face::O, DEFAULT_WIDTH, DEFAULT_HEIGHT);
        let rotated = piece.rotated_cw();
        assert_eq!(piece.cells, rotated.cells);
    }

    #[test]
    fn move_left_then_right_returns_to_start() {
        let mut board = Board::new(DEFAULT_WIDTH, DEFAULT_HEIGHT, true, 0);
        board.start();
        let before = *board.active().unwrap();
        assert!(board.move_left());
        assert!(board.move_right());
        assert_eq!(board.active().unwrap().cells, before.cells);
    }

    #[test]
    fn clearing_a_full_row_removes_it() {
        let mut board = Board::new(4, MIN_HEIGHT, true, 0);
        for x in 0..4 {
            let idx = board.index(x, 0);
            board.cells[idx] = Some(Face::T);
        }
        let cleared = board.clear_lines();
        assert_eq!(cleared, 1);
        assert!((0..4).all(|x| board.cell(x, 0).is_none()));
    }

    #[test]
    fn apply_lock_reports_inconsistency_without_mutating() {
        let mut board = Board::new(DEFAULT_WIDTH, DEFAULT_HEIGHT, true, 0);
        let idx = board.index(0, 0);
        board.cells[idx] = Some(Face::I);
        let before: Vec<_> = board.cells.clone();
        let inconsistent = board.apply_lock(Face::T, [(0, 0), (1, 0), (2, 0), (3, 0)]);
        assert!(inconsistent);
        assert_eq!(board.cells, before);
    }

    #[test]
    fn apply_lock_commits_and_advances_queue_when_consistent() {
        let mut board = Board::new(DEFAULT_WIDTH, DEFAULT_HEIGHT, true, 0);
        board.start();
        let inconsistent = board.apply_lock(Face::T, [(0, 0), (1, 0), (2, 0), (3, 0)]);
        assert!(!inconsistent);
        assert_eq!(board.cell(0, 0), Some(Face::T));
    }

    #[test]
    fn top_out_detected_when_locking_into_top_two_rows() {
        // a wide board so four cells can never complete a row outright —
        // otherwise `clear_lines` would empty it before `check_overflow`
        // gets a chance to see it full.
        let mut board = Board::new(DEFAULT_WIDTH, MIN_HEIGHT, true, 0);
        let top = board.height() - 1;
        let inconsistent = board.apply_lock(Face::T, [(0, top), (1, top), (2, top), (0, top - 1)]);
        assert!(!inconsistent);
        assert!(board.top_out());
    }

    #[test]
    fn drop_interval_decreases_as_level_rises() {
        assert!(Board::drop_interval_ms(0) > Board::drop_interval_ms(10));
    }
}
