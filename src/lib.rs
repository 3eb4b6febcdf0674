use std::cmp::Reverse;
use std::collections::{HashMap, HashSet, VecDeque};
use std::fmt::{Debug, Formatter};
use instant::{Duration, Instant};
use bit_set::BitSet;
use smallvec::SmallVec;
use thiserror::Error;

/// The expected maximum number of distinct characters appearing in a word list.
pub const MAX_GLYPH_COUNT: usize = 256;

/// The expected maximum number of slots appearing in a grid.
pub const MAX_SLOT_COUNT: usize = 256;

/// The expected maximum length for a single slot.
pub const MAX_SLOT_LENGTH: usize = 21;

/// An identifier for a given letter, based on its index in the grid's `glyphs` field.
pub type GlyphId = usize;

/// An identifier for a given slot, based on its index in the grid's `slot_configs` field.
pub type SlotId = usize;

/// An identifier for a given word, based on its index in the grid's `words` field (within the
/// relevant length bucket).
pub type WordId = usize;

/// Zero-indexed row and column coords for a cell in the grid, where row = 0 at the top.
pub type GridCoord = (usize, usize);

/// The candidate-word sets for every slot, indexed by slot id. Word ids are scoped to the bucket
/// matching each slot's length, so a domain can only ever hold words of the right length.
pub type Domains = Vec<Vec<WordId>>;

/// Direction that a slot is facing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Across,
    Down,
}

/// Errors detected while constructing a `GridConfig`. All of these mean the structural input was
/// malformed; none of them can occur once a config has been built successfully.
#[derive(Error, Debug)]
pub enum GridError {
    #[error("slot at ({row}, {col}) running {dir:?} has length {len}, but slots must span at least two cells")]
    EntryTooShort {
        row: usize,
        col: usize,
        dir: Direction,
        len: usize,
    },

    #[error("cell ({row}, {col}) is shared by entries running in the same direction")]
    OverlappingEntries { row: usize, col: usize },

    #[error("slots {a} and {b} intersect in more than one cell")]
    MultipleSharedCells { a: SlotId, b: SlotId },

    #[error("unrecognized cell {ch:?} at ({row}, {col}) in grid template")]
    UnknownTemplateCell { ch: char, row: usize, col: usize },
}

/// A struct representing a word that can be chosen for a given slot.
#[derive(Debug)]
pub struct Word {
    pub string: String,
    pub glyphs: SmallVec<[GlyphId; MAX_SLOT_LENGTH]>,
}

/// A struct representing a crossing between one slot and another, referencing the other slot's id
/// and the location of the intersection within the other slot.
#[derive(Debug, Clone)]
pub struct Crossing {
    pub other_slot_id: SlotId,
    pub other_slot_cell: usize,
}

/// A struct representing the aspects of a slot in the grid that are static during solving. Each
/// cell of the slot either crosses exactly one perpendicular slot or nothing.
#[derive(Debug)]
pub struct SlotConfig {
    pub id: SlotId,
    pub start_cell: GridCoord,
    pub direction: Direction,
    pub length: usize,
    pub crossings: SmallVec<[Option<Crossing>; MAX_SLOT_LENGTH]>,
}

impl SlotConfig {
    /// Generate the coords for each cell of this slot.
    pub fn cell_coords(&self) -> Vec<GridCoord> {
        (0..self.length)
            .map(|cell_idx| match self.direction {
                Direction::Across => (self.start_cell.0, self.start_cell.1 + cell_idx),
                Direction::Down => (self.start_cell.0 + cell_idx, self.start_cell.1),
            })
            .collect()
    }

    /// The number of other slots this slot crosses.
    pub fn degree(&self) -> usize {
        self.crossings.iter().flatten().count()
    }
}

/// A struct representing the aspects of a grid that are static during solving: the cell
/// structure, the interned vocabulary, and the slot set with its crossing relation.
pub struct GridConfig {
    pub width: usize,
    pub height: usize,
    blocked: Vec<bool>,
    pub glyphs: SmallVec<[char; MAX_GLYPH_COUNT]>,
    pub slot_configs: SmallVec<[SlotConfig; MAX_SLOT_COUNT]>,
    pub words: Vec<Vec<Word>>,
}

impl Debug for GridConfig {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let word_count: usize = self.words.iter().map(|bucket| bucket.len()).sum();
        f.debug_struct("GridConfig")
            .field("width", &self.width)
            .field("height", &self.height)
            .field("glyphs", &self.glyphs)
            .field("slot_configs", &self.slot_configs)
            .field("words", &(["(", &word_count.to_string(), " entries)"].join("")))
            .finish()
    }
}

impl GridConfig {
    /// Whether the cell at the given coords is blocked. Coords outside the grid count as blocked.
    pub fn is_blocked(&self, row: usize, col: usize) -> bool {
        if row >= self.height || col >= self.width {
            return true;
        }
        self.blocked[row * self.width + col]
    }

    /// The overlap between two slots, as a pair of intra-word offsets: the `i`-th letter of any
    /// word placed in `x` must equal the `j`-th letter of any word placed in `y`. `None` if the
    /// slots don't intersect.
    pub fn overlap(&self, x: SlotId, y: SlotId) -> Option<(usize, usize)> {
        self.slot_configs[x]
            .crossings
            .iter()
            .enumerate()
            .find_map(|(cell_idx, crossing)| match crossing {
                Some(crossing) if crossing.other_slot_id == y => {
                    Some((cell_idx, crossing.other_slot_cell))
                }
                _ => None,
            })
    }

    /// The ids of every slot crossing the given slot.
    pub fn neighbors(&self, slot_id: SlotId) -> impl Iterator<Item = SlotId> + '_ {
        self.slot_configs[slot_id]
            .crossings
            .iter()
            .flatten()
            .map(|crossing| crossing.other_slot_id)
    }
}

/// An across or down entry in the input to `generate_grid_config`.
#[derive(Debug)]
pub struct GridEntry {
    pub loc: GridCoord,
    pub len: usize,
    pub dir: Direction,
}

impl GridEntry {
    /// Generate the coords for each cell of this entry.
    fn cell_coords(&self) -> Vec<GridCoord> {
        (0..self.len)
            .map(|cell_idx| match self.dir {
                Direction::Across => (self.loc.0, self.loc.1 + cell_idx),
                Direction::Down => (self.loc.0 + cell_idx, self.loc.1),
            })
            .collect()
    }
}

/// Shared construction path: intern the vocabulary, validate the entries, and compute the
/// crossing relation.
fn assemble_grid_config(
    word_list: &[String],
    entries: &[GridEntry],
    width: usize,
    height: usize,
    blocked: Vec<bool>,
) -> Result<GridConfig, GridError> {
    for entry in entries {
        if entry.len < 2 {
            return Err(GridError::EntryTooShort {
                row: entry.loc.0,
                col: entry.loc.1,
                dir: entry.dir,
                len: entry.len,
            });
        }
    }

    // Keep a list of which slot lengths we actually need, to avoid processing irrelevant words.
    let word_lengths: HashSet<usize> = entries.iter().map(|e| e.len).collect();
    let max_length = word_lengths.iter().max().copied().unwrap_or(0);

    // Go through the dictionary and record every distinct character we see. Words are
    // case-normalized here, once, so the rest of the engine only ever compares glyph ids.
    let mut glyphs_set: HashSet<char> = HashSet::new();
    for word in word_list {
        for char in word.to_lowercase().chars() {
            glyphs_set.insert(char);
        }
    }

    let mut config = GridConfig {
        width,
        height,
        blocked,
        glyphs: glyphs_set.into_iter().collect(),
        slot_configs: SmallVec::new(),
        words: (0..max_length + 1).map(|_| vec![]).collect(),
    };

    let mut glyph_ids_by_char: HashMap<char, GlyphId> = HashMap::new();
    for (id, &glyph) in config.glyphs.iter().enumerate() {
        glyph_ids_by_char.insert(glyph, id as GlyphId);
    }

    // Populate the `words` buckets, dropping duplicates so the same vocabulary entry can't end
    // up usable twice under two different ids.
    let mut seen: HashSet<String> = HashSet::with_capacity(word_list.len());
    for word in word_list {
        let normalized = word.to_lowercase();
        let len = normalized.chars().count();
        if !word_lengths.contains(&len) || !seen.insert(normalized.clone()) {
            continue;
        }

        config.words[len].push(Word {
            glyphs: normalized.chars().map(|c| glyph_ids_by_char[&c]).collect(),
            string: normalized,
        });
    }

    // Build a map from cell location to entries involved, which we can then use to calculate
    // crossings. A cell can legally belong to at most one entry per direction.
    let mut cell_by_loc: HashMap<GridCoord, Vec<(usize, usize)>> = HashMap::new();
    for (entry_idx, entry) in entries.iter().enumerate() {
        for (cell_idx, &loc) in entry.cell_coords().iter().enumerate() {
            let cell_entries = cell_by_loc.entry(loc).or_default();
            if cell_entries
                .iter()
                .any(|&(other_idx, _)| entries[other_idx].dir == entry.dir)
            {
                return Err(GridError::OverlappingEntries { row: loc.0, col: loc.1 });
            }
            cell_entries.push((entry_idx, cell_idx));
        }
    }

    // Count shared cells per slot pair. Entries sharing a cell run in different directions at
    // this point, and two perpendicular straight runs can meet in at most one cell, so this
    // only trips on entries that are not straight runs. The variant stays because a multi-cell
    // intersection is part of the construction-error taxonomy.
    let mut shared_cells: HashMap<(usize, usize), usize> = HashMap::new();
    for cell_entries in cell_by_loc.values() {
        for (i, &(a, _)) in cell_entries.iter().enumerate() {
            for &(b, _) in &cell_entries[i + 1..] {
                let key = (a.min(b), a.max(b));
                let count = shared_cells.entry(key).or_insert(0);
                *count += 1;
                if *count > 1 {
                    return Err(GridError::MultipleSharedCells { a: key.0, b: key.1 });
                }
            }
        }
    }

    // Now we can build the actual slots.
    for (entry_idx, entry) in entries.iter().enumerate() {
        let crossings: SmallVec<[Option<Crossing>; MAX_SLOT_LENGTH]> = entry
            .cell_coords()
            .iter()
            .map(|loc| {
                cell_by_loc[loc]
                    .iter()
                    .find(|&&(other_idx, _)| other_idx != entry_idx)
                    .map(|&(other_slot_id, other_slot_cell)| Crossing {
                        other_slot_id,
                        other_slot_cell,
                    })
            })
            .collect();

        config.slot_configs.push(SlotConfig {
            id: entry_idx,
            start_cell: entry.loc,
            direction: entry.dir,
            length: entry.len,
            crossings,
        });
    }

    Ok(config)
}

/// Generate a GridConfig representing a grid with the specified entries. Cells not covered by any
/// entry are treated as blocked.
pub fn generate_grid_config(
    word_list: &[String],
    entries: &[GridEntry],
) -> Result<GridConfig, GridError> {
    let mut height = 0;
    let mut width = 0;
    for entry in entries {
        for (row, col) in entry.cell_coords() {
            height = height.max(row + 1);
            width = width.max(col + 1);
        }
    }

    let mut blocked = vec![true; width * height];
    for entry in entries {
        for (row, col) in entry.cell_coords() {
            blocked[row * width + col] = false;
        }
    }

    assemble_grid_config(word_list, entries, width, height, blocked)
}

/// Generate a grid config from a string template, with `.` representing open cells and `#`
/// representing blocks. Every maximal open run of two or more cells becomes a slot, per
/// direction. Rows shorter than the widest row are padded with blocks.
pub fn generate_grid_config_from_template(
    word_list: &[String],
    template: &str,
) -> Result<GridConfig, GridError> {
    let lines: Vec<&str> = template
        .lines()
        .map(|line| line.trim())
        .filter(|line| !line.is_empty())
        .collect();

    let height = lines.len();
    let width = lines.iter().map(|line| line.chars().count()).max().unwrap_or(0);

    let mut blocked = vec![true; width * height];
    for (row, line) in lines.iter().enumerate() {
        for (col, ch) in line.chars().enumerate() {
            match ch {
                '#' => {}
                '.' => blocked[row * width + col] = false,
                _ => return Err(GridError::UnknownTemplateCell { ch, row, col }),
            }
        }
    }

    let mut entries: Vec<GridEntry> = vec![];

    // Scan rows for across runs, then columns for down runs. The extra index at the end of each
    // scan flushes a run that touches the grid edge.
    for row in 0..height {
        let mut run_start = None;
        for col in 0..=width {
            let open = col < width && !blocked[row * width + col];
            match (open, run_start) {
                (true, None) => run_start = Some(col),
                (false, Some(start)) => {
                    if col - start > 1 {
                        entries.push(GridEntry {
                            loc: (row, start),
                            len: col - start,
                            dir: Direction::Across,
                        });
                    }
                    run_start = None;
                }
                _ => {}
            }
        }
    }

    for col in 0..width {
        let mut run_start = None;
        for row in 0..=height {
            let open = row < height && !blocked[row * width + col];
            match (open, run_start) {
                (true, None) => run_start = Some(row),
                (false, Some(start)) => {
                    if row - start > 1 {
                        entries.push(GridEntry {
                            loc: (start, col),
                            len: row - start,
                            dir: Direction::Down,
                        });
                    }
                    run_start = None;
                }
                _ => {}
            }
        }
    }

    assemble_grid_config(word_list, &entries, width, height, blocked)
}

/// Build the initial domain for every slot: all words whose length matches the slot's length.
/// Because word ids are scoped to per-length buckets, node consistency holds by construction and
/// is preserved by every later shrink.
pub fn initial_domains(config: &GridConfig) -> Domains {
    config
        .slot_configs
        .iter()
        .map(|slot_config| (0..config.words[slot_config.length].len()).collect())
        .collect()
}

/// Make slot `x` arc consistent with slot `y` by removing from `x`'s domain every word with no
/// supporting word in `y`'s domain at the overlap offset. Returns whether `x`'s domain changed;
/// `y`'s domain is never touched. The slots must actually intersect.
pub fn revise(config: &GridConfig, domains: &mut Domains, x: SlotId, y: SlotId) -> bool {
    let (own_cell, other_cell) = config
        .overlap(x, y)
        .expect("revise called on a non-intersecting slot pair");

    // Which glyphs does `y`'s domain still allow at the shared cell?
    let other_words = &config.words[config.slot_configs[y].length];
    let supported: HashSet<GlyphId> = domains[y]
        .iter()
        .map(|&word_id| other_words[word_id].glyphs[other_cell])
        .collect();

    let own_words = &config.words[config.slot_configs[x].length];
    let before = domains[x].len();
    domains[x].retain(|&word_id| supported.contains(&own_words[word_id].glyphs[own_cell]));

    domains[x].len() != before
}

/// Run AC-3 over the whole crossing relation: repeatedly revise slots against their neighbors
/// until a fixed point. Returns false if any domain is wiped out, which proves the grid has no
/// solution under the current domains.
pub fn enforce_arc_consistency(config: &GridConfig, domains: &mut Domains) -> bool {
    let mut queue: VecDeque<(SlotId, SlotId)> = VecDeque::new();
    for slot_config in &config.slot_configs {
        for crossing in slot_config.crossings.iter().flatten() {
            queue.push_back((slot_config.id, crossing.other_slot_id));
        }
    }

    while let Some((x, y)) = queue.pop_front() {
        if revise(config, domains, x, y) {
            if domains[x].is_empty() {
                return false;
            }

            // Shrinking x's domain may have removed the only support for words in x's other
            // neighbors, so their arcs into x need rechecking.
            for z in config.neighbors(x) {
                if z != y {
                    queue.push_back((z, x));
                }
            }
        }
    }

    true
}

/// A struct recording a slot assignment made during solving.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Choice {
    pub slot_id: SlotId,
    pub word_id: WordId,
}

/// A struct tracking statistics about the solving process.
#[derive(Debug, Clone)]
pub struct Statistics {
    pub states: u64,
    pub backtracks: u64,
    pub duration: Duration,
}

/// A struct representing the result of a successful solve: one choice per slot, in slot id
/// order.
#[derive(Debug)]
pub struct Solution {
    pub statistics: Statistics,
    pub choices: Vec<Choice>,
}

/// The live state of a backtracking search: the partial assignment plus a used-word set per
/// length bucket for O(1) global-uniqueness checks.
struct SearchState {
    assignment: Vec<Option<WordId>>,
    used_words: Vec<BitSet>,
    statistics: Statistics,
}

impl SearchState {
    fn new(config: &GridConfig) -> SearchState {
        SearchState {
            assignment: vec![None; config.slot_configs.len()],
            used_words: config
                .words
                .iter()
                .map(|bucket| BitSet::with_capacity(bucket.len()))
                .collect(),
            statistics: Statistics {
                states: 0,
                backtracks: 0,
                duration: Duration::from_millis(0),
            },
        }
    }
}

/// How many words in the slot's domain are still legal, i.e. not already used elsewhere in the
/// assignment.
fn remaining_values(
    config: &GridConfig,
    domains: &Domains,
    state: &SearchState,
    slot_id: SlotId,
) -> usize {
    let used = &state.used_words[config.slot_configs[slot_id].length];
    domains[slot_id]
        .iter()
        .filter(|&&word_id| !used.contains(word_id))
        .count()
}

/// Pick the next slot to fill: minimum remaining values, ties broken by highest degree, then by
/// lowest slot id so the search is deterministic. Returns None once every slot is assigned.
fn select_unassigned_slot(
    config: &GridConfig,
    domains: &Domains,
    state: &SearchState,
) -> Option<SlotId> {
    (0..config.slot_configs.len())
        .filter(|&slot_id| state.assignment[slot_id].is_none())
        .min_by_key(|&slot_id| {
            (
                remaining_values(config, domains, state, slot_id),
                Reverse(config.slot_configs[slot_id].degree()),
                slot_id,
            )
        })
}

/// Order the slot's legal candidates least-constraining first: ascending by the number of
/// unassigned crossing slots whose domain still contains the candidate word. The sort is stable,
/// so ties keep word-list order.
fn order_domain_values(
    config: &GridConfig,
    domains: &Domains,
    state: &SearchState,
    slot_id: SlotId,
) -> Vec<WordId> {
    let slot_config = &config.slot_configs[slot_id];
    let used = &state.used_words[slot_config.length];

    let mut candidates: Vec<WordId> = domains[slot_id]
        .iter()
        .copied()
        .filter(|&word_id| !used.contains(word_id))
        .collect();

    candidates.sort_by_key(|&word_id| {
        slot_config
            .crossings
            .iter()
            .flatten()
            .filter(|crossing| {
                // Only an unassigned slot of the same length can lose this exact word.
                state.assignment[crossing.other_slot_id].is_none()
                    && config.slot_configs[crossing.other_slot_id].length == slot_config.length
                    && domains[crossing.other_slot_id].contains(&word_id)
            })
            .count()
    });

    candidates
}

/// Whether placing the given word in the given slot agrees with every crossing slot that already
/// has a word, at the shared cells. Length always matches by construction, and global uniqueness
/// is enforced by the caller's candidate filtering.
fn choice_is_consistent(
    config: &GridConfig,
    state: &SearchState,
    slot_id: SlotId,
    word_id: WordId,
) -> bool {
    let slot_config = &config.slot_configs[slot_id];
    let word = &config.words[slot_config.length][word_id];

    for (cell_idx, crossing) in slot_config.crossings.iter().enumerate() {
        if let Some(crossing) = crossing {
            if let Some(other_word_id) = state.assignment[crossing.other_slot_id] {
                let other_length = config.slot_configs[crossing.other_slot_id].length;
                let other_word = &config.words[other_length][other_word_id];

                if word.glyphs[cell_idx] != other_word.glyphs[crossing.other_slot_cell] {
                    return false;
                }
            }
        }
    }

    true
}

/// Recursive backtracking over partial assignments. Each branch inserts its tentative choice
/// before recursing and removes it on every failure path, so the assignment never holds stale
/// values. Returns true with the assignment fully populated, or false after exhausting every
/// candidate for the selected slot.
fn backtrack(config: &GridConfig, domains: &Domains, state: &mut SearchState) -> bool {
    state.statistics.states += 1;

    let slot_id = match select_unassigned_slot(config, domains, state) {
        Some(slot_id) => slot_id,
        None => return true,
    };
    let length = config.slot_configs[slot_id].length;

    for word_id in order_domain_values(config, domains, state, slot_id) {
        if !choice_is_consistent(config, state, slot_id, word_id) {
            continue;
        }

        state.assignment[slot_id] = Some(word_id);
        state.used_words[length].insert(word_id);

        if backtrack(config, domains, state) {
            return true;
        }

        state.assignment[slot_id] = None;
        state.used_words[length].remove(word_id);
        state.statistics.backtracks += 1;
    }

    false
}

/// Solve the grid: enforce node and arc consistency, then search for a complete assignment.
/// Returns None if the grid is unsatisfiable; a grid with no slots yields an empty solution.
pub fn solve(config: &GridConfig) -> Option<Solution> {
    let start = Instant::now();

    let mut domains = initial_domains(config);

    // A slot with no length-compatible words at all can't be caught by propagation if it has no
    // crossings, so check for that wipeout directly.
    if domains.iter().any(|domain| domain.is_empty()) {
        return None;
    }

    if !enforce_arc_consistency(config, &mut domains) {
        return None;
    }

    let mut state = SearchState::new(config);
    if !backtrack(config, &domains, &mut state) {
        return None;
    }

    let choices = state
        .assignment
        .iter()
        .enumerate()
        .map(|(slot_id, word_id)| Choice {
            slot_id,
            word_id: word_id.expect("complete assignment is missing a slot"),
        })
        .collect();

    state.statistics.duration = start.elapsed();

    Some(Solution {
        statistics: state.statistics,
        choices,
    })
}

/// Turn the given grid config and solve choices into a rendered string: blocks as `█`, open
/// unfilled cells as spaces, assigned letters in place.
pub fn render_grid(config: &GridConfig, choices: &[Choice]) -> String {
    let mut grid: Vec<Vec<char>> = (0..config.height)
        .map(|row| {
            (0..config.width)
                .map(|col| if config.is_blocked(row, col) { '█' } else { ' ' })
                .collect()
        })
        .collect();

    for &Choice { slot_id, word_id } in choices {
        let slot_config = &config.slot_configs[slot_id];
        let word = &config.words[slot_config.length][word_id];

        for (cell_idx, &glyph) in word.glyphs.iter().enumerate() {
            let (row, col) = slot_config.cell_coords()[cell_idx];
            grid[row][col] = config.glyphs[glyph];
        }
    }

    grid.into_iter()
        .map(|row| row.into_iter().collect::<String>())
        .collect::<Vec<_>>()
        .join("\n")
}
