//! In-memory figure state behind the `matplotlib.pyplot` module.

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct FigureId(pub u32);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Rgb(pub u8, pub u8, pub u8);

impl Rgb {
    /// matplotlib's default `tab10` property cycle.
    pub const CYCLE: [Rgb; 10] = [
        Rgb(0x1f, 0x77, 0xb4),
        Rgb(0xff, 0x7f, 0x0e),
        Rgb(0x2c, 0xa0, 0x2c),
        Rgb(0xd6, 0x27, 0x28),
        Rgb(0x94, 0x67, 0xbd),
        Rgb(0x8c, 0x56, 0x4b),
        Rgb(0xe3, 0x77, 0xc2),
        Rgb(0x7f, 0x7f, 0x7f),
        Rgb(0xbc, 0xbd, 0x22),
        Rgb(0x17, 0xbe, 0xcf),
    ];

    pub fn parse(spec: &str) -> Option<Rgb> {
        let spec = spec.trim();
        if let Some(hex) = spec.strip_prefix('#') {
            if hex.len() != 6 {
                return None;
            }
            let channel = |i: usize| u8::from_str_radix(hex.get(i..i + 2)?, 16).ok();
            return Some(Rgb(channel(0)?, channel(2)?, channel(4)?));
        }
        if let Some(n) = spec.strip_prefix('C') {
            let idx: usize = n.parse().ok()?;
            return Some(Self::CYCLE[idx % Self::CYCLE.len()]);
        }
        let rgb = match spec.to_ascii_lowercase().as_str() {
            "b" | "blue" => Rgb(0, 0, 255),
            "g" | "green" => Rgb(0, 128, 0),
            "r" | "red" => Rgb(255, 0, 0),
            "c" | "cyan" => Rgb(0, 191, 191),
            "m" | "magenta" => Rgb(191, 0, 191),
            "y" | "yellow" => Rgb(191, 191, 0),
            "k" | "black" => Rgb(0, 0, 0),
            "w" | "white" => Rgb(255, 255, 255),
            "orange" => Rgb(255, 165, 0),
            "purple" => Rgb(128, 0, 128),
            "gray" | "grey" => Rgb(128, 128, 128),
            _ => return None,
        };
        Some(rgb)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SeriesKind {
    Line,
    Scatter,
    Bar,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Series {
    pub kind: SeriesKind,
    pub xs: Vec<f64>,
    pub ys: Vec<f64>,
    pub label: Option<String>,
    pub color: Rgb,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Figure {
    pub id: FigureId,
    pub width: u32,
    pub height: u32,
    pub title: Option<String>,
    pub xlabel: Option<String>,
    pub ylabel: Option<String>,
    pub series: Vec<Series>,
    pub legend: bool,
    pub grid: bool,
}

impl Figure {
    fn new(id: FigureId, width: u32, height: u32) -> Self {
        Self {
            id,
            width,
            height,
            title: None,
            xlabel: None,
            ylabel: None,
            series: Vec::new(),
            legend: false,
            grid: false,
        }
    }

    pub fn next_color(&self) -> Rgb {
        Rgb::CYCLE[self.series.len() % Rgb::CYCLE.len()]
    }

    pub fn has_content(&self) -> bool {
        !self.series.is_empty()
    }
}

/// Every open figure, in creation order, plus the "current" figure that
/// module-level plotting calls draw into.
#[derive(Debug, Clone)]
pub struct FigureRegistry {
    figures: Vec<Figure>,
    current: Option<FigureId>,
    next_id: u32,
    default_size: (u32, u32),
}

impl FigureRegistry {
    pub fn new(default_size: (u32, u32)) -> Self {
        Self {
            figures: Vec::new(),
            current: None,
            next_id: 1,
            default_size,
        }
    }

    pub fn default_size(&self) -> (u32, u32) {
        self.default_size
    }

    pub fn len(&self) -> usize {
        self.figures.len()
    }

    pub fn is_empty(&self) -> bool {
        self.figures.is_empty()
    }

    pub fn ids(&self) -> Vec<FigureId> {
        self.figures.iter().map(|f| f.id).collect()
    }

    pub fn new_figure(&mut self, size: Option<(u32, u32)>) -> FigureId {
        let (w, h) = size.unwrap_or(self.default_size);
        let id = FigureId(self.next_id);
        self.next_id += 1;
        self.figures.push(Figure::new(id, w, h));
        self.current = Some(id);
        id
    }

    /// Selects an existing figure, or creates it under that number.
    pub fn select(&mut self, id: FigureId, size: Option<(u32, u32)>) -> FigureId {
        if self.figures.iter().any(|f| f.id == id) {
            self.current = Some(id);
            return id;
        }
        let (w, h) = size.unwrap_or(self.default_size);
        self.figures.push(Figure::new(id, w, h));
        self.next_id = self.next_id.max(id.0 + 1);
        self.current = Some(id);
        id
    }

    pub fn get(&self, id: FigureId) -> Option<&Figure> {
        self.figures.iter().find(|f| f.id == id)
    }

    /// The current figure, created on demand.
    pub fn current_mut(&mut self) -> &mut Figure {
        let current = self.current;
        let id = match current {
            Some(id) if self.figures.iter().any(|f| f.id == id) => id,
            _ => self.new_figure(None),
        };
        let idx = self
            .figures
            .iter()
            .position(|f| f.id == id)
            .unwrap_or(self.figures.len() - 1);
        &mut self.figures[idx]
    }

    pub fn current_id(&self) -> Option<FigureId> {
        self.current
    }

    /// Clears the current figure's content, keeping it open.
    pub fn clear_current(&mut self) {
        if let Some(id) = self.current {
            if let Some(fig) = self.figures.iter_mut().find(|f| f.id == id) {
                let (w, h) = (fig.width, fig.height);
                *fig = Figure::new(id, w, h);
            }
        }
    }

    pub fn close(&mut self, id: FigureId) {
        self.figures.retain(|f| f.id != id);
        if self.current == Some(id) {
            self.current = self.figures.last().map(|f| f.id);
        }
    }

    pub fn close_current(&mut self) {
        if let Some(id) = self.current {
            self.close(id);
        }
    }

    pub fn close_all(&mut self) {
        self.figures.clear();
        self.current = None;
        self.next_id = 1;
    }

    /// Removes and returns every open figure in creation order.
    pub fn drain(&mut self) -> Vec<Figure> {
        self.current = None;
        self.next_id = 1;
        std::mem::take(&mut self.figures)
    }
}

impl Default for FigureRegistry {
    fn default() -> Self {
        Self::new((640, 480))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn current_figure_is_created_on_demand() {
        let mut reg = FigureRegistry::default();
        assert!(reg.is_empty());
        reg.current_mut().title = Some("t".into());
        assert_eq!(reg.len(), 1);
        assert_eq!(reg.current_id(), Some(FigureId(1)));
    }

    #[test]
    fn drain_returns_creation_order_and_empties() {
        let mut reg = FigureRegistry::default();
        reg.new_figure(None);
        reg.new_figure(Some((100, 50)));
        let figs = reg.drain();
        assert_eq!(figs.iter().map(|f| f.id.0).collect::<Vec<_>>(), vec![1, 2]);
        assert_eq!((figs[1].width, figs[1].height), (100, 50));
        assert!(reg.is_empty());
        assert_eq!(reg.new_figure(None), FigureId(1));
    }

    #[test]
    fn close_moves_current_to_last_open() {
        let mut reg = FigureRegistry::default();
        let a = reg.new_figure(None);
        let b = reg.new_figure(None);
        reg.close(b);
        assert_eq!(reg.current_id(), Some(a));
    }

    #[test]
    fn parses_colors() {
        assert_eq!(Rgb::parse("#ff0000"), Some(Rgb(255, 0, 0)));
        assert_eq!(Rgb::parse("C1"), Some(Rgb::CYCLE[1]));
        assert_eq!(Rgb::parse("k"), Some(Rgb(0, 0, 0)));
        assert_eq!(Rgb::parse("nope"), None);
    }
}
