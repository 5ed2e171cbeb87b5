use super::part::BufferPart;
use std::fmt::{Debug, Formatter};
use std::mem::replace;
use std::rc::Rc;

type OptNode = Option<Rc<Node>>;
struct IsShorter(bool);
struct IsTaller(bool);

// Every node carries one part.  Besides the subtree heights used for AVL
// balancing, a node caches the byte lengths of both subtrees so that a byte
// offset can be resolved without keys.
#[derive(Clone)]
struct Node {
    part: BufferPart,
    left_ht: i8,
    right_ht: i8,
    left_len: usize,
    right_len: usize,
    left: OptNode,
    right: OptNode,
}

impl Node {
    fn new(part: BufferPart, left: OptNode, right: OptNode) -> Self {
        Node {
            part,
            left_ht: height(&left),
            right_ht: height(&right),
            left_len: bytes(&left),
            right_len: bytes(&right),
            left,
            right,
        }
    }

    // Returns the "balance factor" of the node
    fn bal(&self) -> i8 {
        self.right_ht - self.left_ht
    }

    #[cfg_attr(not(test), allow(dead_code))]
    fn is_bal(&self) -> bool {
        // single-branch range inclusion check; requires unsigned wrap around
        ((self.bal() + 1) as u8) <= 2
    }

    fn height(&self) -> i8 {
        self.left_ht.max(self.right_ht) + 1
    }

    // bytes covered by the whole subtree
    fn len(&self) -> usize {
        self.left_len + self.part.len() + self.right_len
    }

    fn for_each_mut<F>(&mut self, g: &mut F)
    where
        F: FnMut(&mut BufferPart),
    {
        if let Some(rc) = self.left.as_mut() {
            Rc::make_mut(rc).for_each_mut(g);
        }

        let before = self.part.len();
        g(&mut self.part);
        debug_assert_eq!(before, self.part.len(), "for_each_mut resized a part");

        if let Some(rc) = self.right.as_mut() {
            Rc::make_mut(rc).for_each_mut(g);
        }
    }

    #[cfg(test)]
    fn chk(&self) -> (usize, usize) {
        assert!(self.part.len() > 0);

        assert_eq!(height(&self.left), self.left_ht);
        assert_eq!(height(&self.right), self.right_ht);
        assert!(self.is_bal());

        let (lf_bytes, lf_cnt) = chk(&self.left);
        let (rt_bytes, rt_cnt) = chk(&self.right);
        assert_eq!(lf_bytes, self.left_len);
        assert_eq!(rt_bytes, self.right_len);

        (self.len(), lf_cnt + rt_cnt + 1)
    }
}

fn height(opt_node: &OptNode) -> i8 {
    opt_node.as_ref().map_or(0, |rc| rc.height())
}

fn bytes(opt_node: &OptNode) -> usize {
    opt_node.as_ref().map_or(0, |rc| rc.len())
}

#[cfg(test)]
fn chk(opt_node: &OptNode) -> (usize, usize) {
    opt_node.as_ref().map_or((0, 0), |n| n.chk())
}

// prerequisites:
//   - opt_node.is_some()
//   - the node is uniquely owned
fn take_node(opt_node: &mut OptNode) -> Node {
    let old_rc = opt_node.take().unwrap();
    match Rc::try_unwrap(old_rc) {
        Ok(n) => n,
        Err(_) => panic!("Attempt to take a shared node"),
    }
}

fn rot_lf(root: &mut OptNode) -> IsShorter {
    // We want the following transformation:
    //    a(x, b(y, z)))   =>   b(a(x, y), z)
    // x and z retain the same parents.

    let mut a_opt = root.take();
    let a_rc = a_opt.as_mut().unwrap();
    let a = Rc::make_mut(a_rc);

    let mut b_opt = a.right.take();
    let b_rc = b_opt.as_mut().unwrap();
    let b = Rc::make_mut(b_rc);

    // if b is balanced, the rotation will make a shorter tree
    let b_was_bal = b.bal() == 0;

    // move y from b to a
    a.right_ht = b.left_ht;
    a.right_len = b.left_len;
    a.right = b.left.take();

    // make a be b's left child
    b.left_ht = a.height();
    b.left_len = a.len();
    b.left = a_opt;

    *root = b_opt;

    IsShorter(!b_was_bal)
}

fn rot_rt_lf(root: &mut OptNode) -> IsShorter {
    // We want the following transformation:
    //    a(x, b(c(y, z), w))   =>   c(a(x, y), b(z, w))
    // x and w retain the same parents.

    let mut a_opt = root.take();
    let a_rc = a_opt.as_mut().unwrap();
    let a = Rc::make_mut(a_rc);

    let mut b_opt = a.right.take();
    let b_rc = b_opt.as_mut().unwrap();
    let b = Rc::make_mut(b_rc);

    let mut c_opt = b.left.take();
    let c_rc = c_opt.as_mut().unwrap();
    let c = Rc::make_mut(c_rc);

    // With the unlinks done so far we have
    //   a(x, None)
    //   b(None, w)
    //   c(y, z)

    a.right_ht = c.left_ht;
    a.right_len = c.left_len;
    a.right = c.left.take();

    b.left_ht = c.right_ht;
    b.left_len = c.right_len;
    b.left = c.right.take();

    c.left_ht = a.height();
    c.left_len = a.len();
    c.left = a_opt.take();

    c.right_ht = b.height();
    c.right_len = b.len();
    c.right = b_opt.take();

    *root = c_opt;

    // this rebalance always makes the tree shorter
    IsShorter(true)
}

fn rot_rt(root: &mut OptNode) -> IsShorter {
    // We want the following transformation:
    //    a(b(x, y), z)   =>   b(x, a(y, z))
    // x and z retain the same parents.

    let mut a_opt = root.take();
    let a_rc = a_opt.as_mut().unwrap();
    let a = Rc::make_mut(a_rc);

    let mut b_opt = a.left.take();
    let b_rc = b_opt.as_mut().unwrap();
    let b = Rc::make_mut(b_rc);

    let b_was_bal = b.bal() == 0;

    // move y from b to a
    a.left_ht = b.right_ht;
    a.left_len = b.right_len;
    a.left = b.right.take();

    // move a into b
    b.right_ht = a.height();
    b.right_len = a.len();
    b.right = a_opt.take();

    *root = b_opt;

    IsShorter(!b_was_bal)
}

fn rot_lf_rt(root: &mut OptNode) -> IsShorter {
    // We want the following transformation:
    //    a(b(x,c(y,z)),w)   =>   c(b(x,y),a(z,w))
    // x and w retain the same parents.

    let mut a_opt = root.take();
    let a_rc = a_opt.as_mut().unwrap();
    let a = Rc::make_mut(a_rc);

    let mut b_opt = a.left.take();
    let b_rc = b_opt.as_mut().unwrap();
    let b = Rc::make_mut(b_rc);

    let mut c_opt = b.right.take();
    let c_rc = c_opt.as_mut().unwrap();
    let c = Rc::make_mut(c_rc);

    b.right_ht = c.left_ht;
    b.right_len = c.left_len;
    b.right = c.left.take(); // => b(x, y), c(None, z)

    a.left_ht = c.right_ht;
    a.left_len = c.right_len;
    a.left = c.right.take(); // => a(z, w), c(None, None)

    c.left_ht = b.height();
    c.left_len = b.len();
    c.left = b_opt;

    c.right_ht = a.height();
    c.right_len = a.len();
    c.right = a_opt;

    *root = c_opt;

    IsShorter(true)
}

// rebalance by "shifting height" from left to right
fn rebal_lf_to_rt(root: &mut OptNode) -> IsShorter {
    let n = Rc::get_mut(root.as_mut().unwrap()).unwrap();

    if n.left.as_ref().unwrap().bal() <= 0 {
        rot_rt(root)
    } else {
        rot_lf_rt(root)
    }
}

// rebalance by "shifting height" from right to left
fn rebal_rt_to_lf(root: &mut OptNode) -> IsShorter {
    let n = Rc::get_mut(root.as_mut().unwrap()).unwrap();

    if n.right.as_ref().unwrap().bal() >= 0 {
        rot_lf(root)
    } else {
        rot_rt_lf(root)
    }
}

// Inserts part so that it starts at byte `at` of the subtree.  `at` must be a
// part boundary.  Returns whether the subtree grew taller.
fn ins(root: &mut OptNode, at: usize, part: BufferPart) -> IsTaller {
    let n = match root.as_mut() {
        None => {
            *root = Some(Rc::new(Node::new(part, None, None)));
            return IsTaller(true); // *** EARLY RETURN ***
        }

        Some(rc) => Rc::make_mut(rc),
    };

    let added = part.len();
    if at <= n.left_len {
        let is_taller = ins(&mut n.left, at, part);
        n.left_len += added;
        n.left_ht += is_taller.0 as i8;
        if is_taller.0 && n.bal() < -1 {
            rebal_lf_to_rt(root);
            IsTaller(false)
        } else {
            IsTaller(is_taller.0 && n.bal() < 0)
        }
    } else {
        let skip = n.left_len + n.part.len();
        assert!(at >= skip, "insertion point splits an existing part");
        let is_taller = ins(&mut n.right, at - skip, part);
        n.right_len += added;
        n.right_ht += is_taller.0 as i8;
        if is_taller.0 && n.bal() > 1 {
            rebal_rt_to_lf(root);
            IsTaller(false)
        } else {
            IsTaller(is_taller.0 && n.bal() > 0)
        }
    }
}

// helper function for rm that removes the leftmost node and returns its part
// and whether or not the removal made the tree shorter.
fn rm_leftmost(root: &mut OptNode) -> (Option<BufferPart>, IsShorter) {
    let n = match root.as_mut() {
        None => return (None, IsShorter(false)), // *** EARLY RETURN ***
        Some(rc) => Rc::make_mut(rc),
    };

    if n.left.is_some() {
        let (part, is_shorter) = rm_leftmost(&mut n.left);
        n.left_len -= part.as_ref().map_or(0, |p| p.len());
        n.left_ht -= is_shorter.0 as i8;
        if is_shorter.0 && n.bal() > 1 {
            (part, rebal_rt_to_lf(root))
        } else {
            (part, IsShorter(is_shorter.0 && n.bal() == 0))
        }
    } else {
        let old_n = take_node(root);
        *root = old_n.right;
        (Some(old_n.part), IsShorter(true))
    }
}

// Removes the part starting at byte `at` of the subtree.
fn rm(root: &mut OptNode, at: usize) -> (Option<BufferPart>, IsShorter) {
    let n = match root.as_mut() {
        None => return (None, IsShorter(false)), // *** EARLY RETURN ***
        Some(rc) => Rc::make_mut(rc),
    };

    if at < n.left_len {
        let (part, is_shorter) = rm(&mut n.left, at);
        n.left_len -= part.as_ref().map_or(0, |p| p.len());
        n.left_ht -= is_shorter.0 as i8;
        if is_shorter.0 && n.bal() > 1 {
            (part, rebal_rt_to_lf(root))
        } else {
            (part, IsShorter(is_shorter.0 && n.bal() == 0))
        }
    } else if at > n.left_len {
        let skip = n.left_len + n.part.len();
        if at < skip {
            // `at` points into the middle of this part
            return (None, IsShorter(false));
        }

        let (part, is_shorter) = rm(&mut n.right, at - skip);
        n.right_len -= part.as_ref().map_or(0, |p| p.len());
        n.right_ht -= is_shorter.0 as i8;
        if is_shorter.0 && n.bal() < -1 {
            (part, rebal_lf_to_rt(root))
        } else {
            (part, IsShorter(is_shorter.0 && n.bal() == 0))
        }
    } else {
        match (&n.left, &n.right) {
            (None, None) => {
                let old_n = take_node(root);
                (Some(old_n.part), IsShorter(true))
            }

            (None, Some(_)) => {
                let old_n = take_node(root);
                *root = old_n.right;
                (Some(old_n.part), IsShorter(true))
            }

            (Some(_), None) => {
                let old_n = take_node(root);
                *root = old_n.left;
                (Some(old_n.part), IsShorter(true))
            }

            _ => {
                // both children are populated
                let (succ, is_shorter) = rm_leftmost(&mut n.right);
                let succ = succ.unwrap();
                n.right_len -= succ.len();
                let old_part = replace(&mut n.part, succ);

                n.right_ht -= is_shorter.0 as i8;
                if is_shorter.0 && n.bal() < -1 {
                    // we were taller on left and lost height on right
                    (Some(old_part), rebal_lf_to_rt(root))
                } else {
                    (Some(old_part), IsShorter(is_shorter.0 && n.bal() == 0))
                }
            }
        }
    }
}

// Applies f to the part starting at byte `at` and refreshes the cached lengths
// on the path.  Returns the part's (old, new) length.
fn upd<F>(root: &mut OptNode, at: usize, f: F) -> Option<(usize, usize)>
where
    F: FnOnce(&mut BufferPart),
{
    let n = Rc::make_mut(root.as_mut()?);

    if at < n.left_len {
        let (old, new) = upd(&mut n.left, at, f)?;
        n.left_len = n.left_len - old + new;
        Some((old, new))
    } else if at == n.left_len {
        let old = n.part.len();
        f(&mut n.part);
        Some((old, n.part.len()))
    } else {
        let skip = n.left_len + n.part.len();
        if at < skip {
            return None;
        }
        let (old, new) = upd(&mut n.right, at - skip, f)?;
        n.right_len = n.right_len - old + new;
        Some((old, new))
    }
}

/// An AVL tree of buffer parts addressed by byte offset.
///
/// Offsets are relative to the start of the first part.  Like the node
/// structure it is built from, the tree is persistent: a clone shares all
/// nodes and the two copies diverge node by node as they are updated.
#[derive(Clone, Default)]
pub(crate) struct PartTree {
    root: OptNode,
    len: usize,
    count: usize,
}

impl PartTree {
    pub(crate) fn new() -> Self {
        PartTree::default()
    }

    /// Total number of bytes covered by all parts.
    pub(crate) fn len(&self) -> usize {
        self.len
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub(crate) fn part_count(&self) -> usize {
        self.count
    }

    /// Finds the part covering `offset` and returns its start with it.
    pub(crate) fn locate(&self, offset: usize) -> Option<(usize, &BufferPart)> {
        let mut curr = &self.root;
        let mut base = 0;
        let mut off = offset;
        while let Some(n) = curr {
            if off < n.left_len {
                curr = &n.left;
            } else if off < n.left_len + n.part.len() {
                return Some((base + n.left_len, &n.part));
            } else {
                let skip = n.left_len + n.part.len();
                base += skip;
                off -= skip;
                curr = &n.right;
            }
        }

        None
    }

    pub(crate) fn first(&self) -> Option<&BufferPart> {
        self.locate(0).map(|(_, p)| p)
    }

    pub(crate) fn last(&self) -> Option<(usize, &BufferPart)> {
        self.len.checked_sub(1).and_then(|off| self.locate(off))
    }

    /// Inserts `part` so that it starts at byte `at`, which must be 0, the
    /// end of the tree, or the start of an existing part.
    pub(crate) fn insert(&mut self, at: usize, part: BufferPart) {
        assert!(at <= self.len, "insertion at {at} beyond end {}", self.len);
        self.len += part.len();
        self.count += 1;
        ins(&mut self.root, at, part);
    }

    pub(crate) fn push_front(&mut self, part: BufferPart) {
        self.insert(0, part);
    }

    pub(crate) fn push_back(&mut self, part: BufferPart) {
        self.insert(self.len, part);
    }

    /// Removes the part starting exactly at byte `at`.
    pub(crate) fn remove(&mut self, at: usize) -> Option<BufferPart> {
        let (part, _) = rm(&mut self.root, at);
        if let Some(p) = part.as_ref() {
            self.len -= p.len();
            self.count -= 1;
        }
        part
    }

    /// Changes the part starting at byte `at` in place; the part may change
    /// length.  Returns false if no part starts at `at`.
    pub(crate) fn update<F>(&mut self, at: usize, f: F) -> bool
    where
        F: FnOnce(&mut BufferPart),
    {
        match upd(&mut self.root, at, f) {
            Some((old, new)) => {
                debug_assert!(new > 0, "update emptied a part");
                self.len = self.len - old + new;
                true
            }
            None => false,
        }
    }

    /// Ensures that a part boundary exists at `offset`.
    pub(crate) fn split_at(&mut self, offset: usize) {
        let (start, lhs, rhs) = match self.locate(offset) {
            Some((start, part)) if start < offset => {
                let (lhs, rhs) = part.split_at(offset - start);
                (start, lhs, rhs)
            }
            _ => return,
        };

        self.update(start, |p| *p = lhs);
        self.insert(offset, rhs);
    }

    /// Merges the parts that meet at boundary `at` if they are compatible.
    pub(crate) fn coalesce(&mut self, at: usize) -> bool {
        if at == 0 || at >= self.len {
            return false;
        }

        let merged = match (self.locate(at - 1), self.locate(at)) {
            (Some((lhs_start, lhs)), Some((rhs_start, rhs))) if rhs_start == at => {
                lhs.merge(rhs).map(|m| (lhs_start, m))
            }
            _ => None,
        };

        match merged {
            Some((lhs_start, m)) => {
                self.remove(at);
                self.update(lhs_start, |p| *p = m);
                true
            }
            None => false,
        }
    }

    /// Returns the parts covering `[start, start + len)`, trimmed to it.
    pub(crate) fn slices(&self, start: usize, len: usize) -> Vec<BufferPart> {
        let end = start + len;
        let mut out = Vec::new();
        for (s, p) in self.iter_from(start) {
            if s >= end {
                break;
            }
            let lo = s.max(start);
            let hi = (s + p.len()).min(end);
            out.push(p.slice(lo - s, hi - lo));
        }
        out
    }

    /// Rewrites every part in order.  The parts must keep their lengths.
    pub(crate) fn for_each_mut<F: FnMut(&mut BufferPart)>(&mut self, mut f: F) {
        if let Some(rc) = self.root.as_mut() {
            Rc::make_mut(rc).for_each_mut(&mut f);
        }
    }

    /// Iterates `(start, part)` pairs in offset order.
    pub(crate) fn iter(&self) -> Iter<'_> {
        let mut work = Vec::new();
        let mut curr = self.root.as_ref();
        while let Some(n) = curr {
            work.push(n);
            curr = n.left.as_ref();
        }

        Iter { work, pos: 0 }
    }

    /// Like [`iter`](#method.iter), but starts at the part covering `offset`.
    pub(crate) fn iter_from(&self, offset: usize) -> Iter<'_> {
        let mut work = Vec::new();
        let mut curr = self.root.as_ref();
        let mut base = 0;
        let mut off = offset;
        let mut pos = 0;
        while let Some(n) = curr {
            if off < n.left_len {
                work.push(n);
                curr = n.left.as_ref();
            } else if off < n.left_len + n.part.len() {
                work.push(n);
                pos = base + n.left_len;
                break;
            } else {
                let skip = n.left_len + n.part.len();
                base += skip;
                off -= skip;
                curr = n.right.as_ref();
            }
        }

        Iter { work, pos }
    }

    #[cfg(test)]
    pub(crate) fn chk(&self) {
        let (len, count) = chk(&self.root);
        assert_eq!(len, self.len);
        assert_eq!(count, self.count);
    }
}

impl Debug for PartTree {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_list().entries(self.iter()).finish()
    }
}

pub(crate) struct Iter<'a> {
    work: Vec<&'a Rc<Node>>,
    pos: usize,
}

impl<'a> Iterator for Iter<'a> {
    type Item = (usize, &'a BufferPart);

    fn next(&mut self) -> Option<Self::Item> {
        self.work.pop().map(|n| {
            let start = self.pos;
            self.pos += n.part.len();
            let mut curr = n.right.as_ref();
            while let Some(m) = curr {
                self.work.push(m);
                curr = m.left.as_ref();
            }
            (start, &n.part)
        })
    }
}
