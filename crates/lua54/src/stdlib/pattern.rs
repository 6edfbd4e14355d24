//! Lua pattern matching for `string.find`/`match`/`gmatch`/`gsub`,
//! condensed from the classic backtracking algorithm in `lstrlib.c`. This
//! reimplementation keeps the same recursive-descent shape as the original
//! but operates on bytes and supports the full class/quantifier/capture
//! grammar rather than a simplified subset.

const MAX_CAPTURES: usize = 32;
const CAP_POSITION: isize = -2;
const CAP_UNFINISHED: isize = -1;

#[derive(Clone, Copy)]
struct Capture {
    start: usize,
    len: isize,
}

pub struct MatchState<'a> {
    src: &'a [u8],
    pat: &'a [u8],
    captures: Vec<Capture>,
    depth: u32,
}

/// Result of a successful pattern match: the whole-match span plus each
/// capture (or the position, for a `()` position-capture).
pub struct MatchResult {
    pub start: usize,
    pub end: usize,
    pub captures: Vec<CaptureValue>,
}

pub enum CaptureValue {
    Span(usize, usize),
    Position(usize),
}

const MAX_DEPTH: u32 = 200;

impl<'a> MatchState<'a> {
    fn new(src: &'a [u8], pat: &'a [u8]) -> Self {
        MatchState { src, pat, captures: Vec::new(), depth: 0 }
    }

    /// Finds the end of the single pattern item starting at `p` (a literal
    /// char, `%x` class, or `[...]` set) — mirrors `classend` from
    /// `lstrlib.c`. A `]` immediately after `[` or `[^` is a literal set
    /// member, not the close, since it can only be consumed as data on its
    /// first pass through the loop below.
    fn class_end(&self, p: usize) -> Result<usize, &'static str> {
        let c = *self.pat.get(p).ok_or("malformed pattern")?;
        let mut p = p + 1;
        match c {
            b'%' => {
                if p >= self.pat.len() {
                    return Err("malformed pattern (ends with '%')");
                }
                Ok(p + 1)
            }
            b'[' => {
                if self.pat.get(p) == Some(&b'^') {
                    p += 1;
                }
                loop {
                    if p >= self.pat.len() {
                        return Err("malformed pattern (missing ']')");
                    }
                    let cc = self.pat[p];
                    p += 1;
                    if cc == b'%' {
                        if p >= self.pat.len() {
                            return Err("malformed pattern (ends with '%')");
                        }
                        p += 1;
                    }
                    if self.pat.get(p) == Some(&b']') {
                        break;
                    }
                }
                Ok(p + 1)
            }
            _ => Ok(p),
        }
    }

    fn single_match(&self, s: usize, p: usize, ep: usize) -> bool {
        let Some(&c) = self.src.get(s) else { return false };
        match self.pat[p] {
            b'.' => true,
            b'%' => match_class(c, self.pat[p + 1]),
            b'[' => match_set(c, &self.pat[p..ep]),
            pc => pc == c,
        }
    }

    fn do_match(&mut self, s: usize, p: usize) -> Result<Option<usize>, &'static str> {
        self.depth += 1;
        if self.depth > MAX_DEPTH {
            self.depth -= 1;
            return Err("pattern too complex");
        }
        let result = self.do_match_inner(s, p);
        self.depth -= 1;
        result
    }

    fn do_match_inner(&mut self, mut s: usize, mut p: usize) -> Result<Option<usize>, &'static str> {
        loop {
            if p >= self.pat.len() {
                return Ok(Some(s));
            }
            match self.pat[p] {
                b'(' => {
                    return if self.pat.get(p + 1) == Some(&b')') {
                        self.start_capture(s, p + 2, CAP_POSITION)
                    } else {
                        self.start_capture(s, p + 1, CAP_UNFINISHED)
                    };
                }
                b')' => return self.end_capture(s, p + 1),
                b'$' if p + 1 == self.pat.len() => {
                    return Ok((s == self.src.len()).then_some(s));
                }
                b'%' if self.pat.get(p + 1) == Some(&b'b') => return self.match_balance(s, p + 2),
                b'%' if self.pat.get(p + 1) == Some(&b'f') => {
                    let mut p2 = p + 2;
                    if self.pat.get(p2) != Some(&b'[') {
                        return Err("missing '[' after '%f' in pattern");
                    }
                    let ep = self.class_end(p2)?;
                    let prev = if s == 0 { 0u8 } else { self.src[s - 1] };
                    let cur = *self.src.get(s).unwrap_or(&0);
                    if !match_set(prev, &self.pat[p2..ep]) && match_set(cur, &self.pat[p2..ep]) {
                        p2 = ep;
                        p = p2;
                        continue;
                    }
                    return Ok(None);
                }
                b'%' if self.pat.get(p + 1).is_some_and(|c| c.is_ascii_digit()) => {
                    return self.match_capture(s, p);
                }
                _ => {}
            }

            let ep = self.class_end(p)?;
            let matched = self.single_match(s, p, ep);
            match self.pat.get(ep) {
                Some(b'?') => {
                    if matched {
                        if let Some(r) = self.do_match(s + 1, ep + 1)? {
                            return Ok(Some(r));
                        }
                    }
                    p = ep + 1;
                    continue;
                }
                Some(b'+') => {
                    return if matched { self.max_expand(s + 1, p, ep) } else { Ok(None) };
                }
                Some(b'*') => return self.max_expand(s, p, ep),
                Some(b'-') => return self.min_expand(s, p, ep),
                _ => {
                    if !matched {
                        return Ok(None);
                    }
                    s += 1;
                    p = ep;
                    continue;
                }
            }
        }
    }

    fn max_expand(&mut self, s: usize, p: usize, ep: usize) -> Result<Option<usize>, &'static str> {
        let mut i = 0;
        while self.single_match(s + i, p, ep) {
            i += 1;
        }
        loop {
            if let Some(r) = self.do_match(s + i, ep + 1)? {
                return Ok(Some(r));
            }
            if i == 0 {
                return Ok(None);
            }
            i -= 1;
        }
    }

    fn min_expand(&mut self, mut s: usize, p: usize, ep: usize) -> Result<Option<usize>, &'static str> {
        loop {
            if let Some(r) = self.do_match(s, ep + 1)? {
                return Ok(Some(r));
            }
            if self.single_match(s, p, ep) {
                s += 1;
            } else {
                return Ok(None);
            }
        }
    }

    fn start_capture(&mut self, s: usize, p: usize, what: isize) -> Result<Option<usize>, &'static str> {
        if self.captures.len() >= MAX_CAPTURES {
            return Err("too many captures");
        }
        self.captures.push(Capture { start: s, len: what });
        let idx = self.captures.len() - 1;
        let result = self.do_match(s, p)?;
        if result.is_none() {
            self.captures.truncate(idx);
        }
        Ok(result)
    }

    fn end_capture(&mut self, s: usize, p: usize) -> Result<Option<usize>, &'static str> {
        let idx = self
            .captures
            .iter()
            .rposition(|c| c.len == CAP_UNFINISHED)
            .ok_or("invalid pattern capture")?;
        self.captures[idx].len = (s - self.captures[idx].start) as isize;
        let result = self.do_match(s, p)?;
        if result.is_none() {
            self.captures[idx].len = CAP_UNFINISHED;
        }
        Ok(result)
    }

    fn match_capture(&mut self, s: usize, p: usize) -> Result<Option<usize>, &'static str> {
        let n = (self.pat[p + 1] - b'1') as usize;
        let cap = self.captures.get(n).ok_or("invalid capture index")?;
        let len = cap.len.max(0) as usize;
        let start = cap.start;
        if self.src.len() >= s + len && self.src[start..start + len] == self.src[s..s + len] {
            self.do_match(s + len, p + 2)
        } else {
            Ok(None)
        }
    }

    fn match_balance(&mut self, s: usize, p: usize) -> Result<Option<usize>, &'static str> {
        if p + 1 >= self.pat.len() {
            return Err("missing arguments to '%b'");
        }
        let (b, e) = (self.pat[p], self.pat[p + 1]);
        if self.src.get(s) != Some(&b) {
            return Ok(None);
        }
        let mut cont = 1i32;
        let mut i = s + 1;
        while i < self.src.len() {
            if self.src[i] == e {
                cont -= 1;
                if cont == 0 {
                    return self.do_match(i + 1, p + 2);
                }
            } else if self.src[i] == b {
                cont += 1;
            }
            i += 1;
        }
        Ok(None)
    }

    fn push_captures(&self, s: usize, e: usize) -> Vec<CaptureValue> {
        if self.captures.is_empty() {
            return vec![CaptureValue::Span(s, e)];
        }
        self.captures
            .iter()
            .map(|c| {
                if c.len == CAP_POSITION {
                    CaptureValue::Position(c.start)
                } else {
                    CaptureValue::Span(c.start, c.start + c.len.max(0) as usize)
                }
            })
            .collect()
    }
}

fn match_class(c: u8, cl: u8) -> bool {
    let res = match cl.to_ascii_lowercase() {
        b'a' => c.is_ascii_alphabetic(),
        b'd' => c.is_ascii_digit(),
        b'l' => c.is_ascii_lowercase(),
        b'u' => c.is_ascii_uppercase(),
        b's' => c.is_ascii_whitespace(),
        b'w' => c.is_ascii_alphanumeric(),
        b'c' => c.is_ascii_control(),
        b'p' => c.is_ascii_punctuation(),
        b'x' => c.is_ascii_hexdigit(),
        b'g' => c.is_ascii_graphic(),
        _ => return cl == c,
    };
    if cl.is_ascii_uppercase() {
        !res
    } else {
        res
    }
}

fn match_set(c: u8, set: &[u8]) -> bool {
    // `set` spans from the opening '[' to (and including) the closing ']'.
    let mut i = 1;
    let mut negate = false;
    if set.get(i) == Some(&b'^') {
        negate = true;
        i += 1;
    }
    let mut found = false;
    while i < set.len() - 1 {
        if set[i] == b'%' {
            i += 1;
            if match_class(c, set[i]) {
                found = true;
            }
            i += 1;
        } else if i + 2 < set.len() - 1 && set[i + 1] == b'-' {
            if set[i] <= c && c <= set[i + 2] {
                found = true;
            }
            i += 3;
        } else {
            if set[i] == c {
                found = true;
            }
            i += 1;
        }
    }
    found != negate
}

fn pattern_has_captures(pat: &[u8]) -> bool {
    pat.contains(&b'(')
}

/// Finds the first match of `pat` in `src` starting at or after byte offset
/// `init`. `plain` bypasses the pattern engine entirely (a literal
/// substring search, spec-equivalent to `string.find`'s fourth argument).
pub fn find(src: &[u8], pat: &[u8], init: usize, plain: bool) -> Result<Option<MatchResult>, &'static str> {
    if plain || (!pattern_has_captures(pat) && !pat.iter().any(|&c| b"^$*+?.([%-".contains(&c))) {
        if init > src.len() {
            return Ok(None);
        }
        return Ok(find_plain(src, pat, init).map(|start| MatchResult { start, end: start + pat.len(), captures: vec![] }));
    }
    match_from(src, pat, init)
}

fn find_plain(src: &[u8], needle: &[u8], init: usize) -> Option<usize> {
    if needle.is_empty() {
        return Some(init);
    }
    src[init..].windows(needle.len()).position(|w| w == needle).map(|p| p + init)
}

/// Runs the backtracking matcher anchored at every starting position from
/// `init` onward (or only at `init` if the pattern begins with `^`).
pub fn match_from(src: &[u8], pat: &[u8], init: usize) -> Result<Option<MatchResult>, &'static str> {
    let anchored = pat.first() == Some(&b'^');
    let pat_body = if anchored { &pat[1..] } else { pat };
    let mut s = init.min(src.len());
    loop {
        let mut ms = MatchState::new(src, pat_body);
        if let Some(end) = ms.do_match(s, 0)? {
            let caps = ms.push_captures(s, end);
            return Ok(Some(MatchResult { start: s, end, captures: caps }));
        }
        if anchored || s >= src.len() {
            return Ok(None);
        }
        s += 1;
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn find_str(src: &str, pat: &str) -> Option<(usize, usize)> {
        find(src.as_bytes(), pat.as_bytes(), 0, false).unwrap().map(|m| (m.start, m.end))
    }

    #[test]
    fn plain_literal_match() {
        assert_eq!(find_str("hello world", "world"), Some((6, 11)));
    }

    #[test]
    fn anchored_pattern_only_matches_at_start() {
        assert_eq!(find_str("  hello", "^hello"), None);
        assert_eq!(find_str("hello", "^hello"), Some((0, 5)));
    }

    #[test]
    fn character_classes() {
        assert_eq!(find_str("abc123", "%d+"), Some((3, 6)));
        assert_eq!(find_str("  abc", "%a+"), Some((2, 5)));
    }

    #[test]
    fn set_with_range_and_negation() {
        assert_eq!(find_str("foo-bar", "[a-z]+"), Some((0, 3)));
        assert_eq!(find_str("foo123", "[^%d]+"), Some((0, 3)));
    }

    #[test]
    fn captures_span_the_right_bytes() {
        let m = match_from(b"key=value", b"(%a+)=(%a+)", 0).unwrap().unwrap();
        assert_eq!(m.captures.len(), 2);
        match &m.captures[0] {
            CaptureValue::Span(s, e) => assert_eq!(&b"key=value"[*s..*e], b"key"),
            _ => panic!("expected span capture"),
        }
    }

    #[test]
    fn balanced_match() {
        assert_eq!(find_str("(foo(bar)baz)qux", "%b()"), Some((0, 13)));
    }

    #[test]
    fn minimal_and_maximal_expansion_differ() {
        assert_eq!(find_str("<a><b>", "<.->"), Some((0, 3)));
        assert_eq!(find_str("<a><b>", "<.*>"), Some((0, 6)));
    }

    #[test]
    fn literal_bracket_as_first_set_member() {
        assert_eq!(find_str("a]b", "[]ab]+"), Some((0, 3)));
    }
}
