//! Arena 式并查集.
//!
//! 标号过程中的等价类合并不使用链式结构, 而是把节点放进以整数 id
//! 索引的稠密数组, 以便所有权清晰、缓存友好 (见设计注记).

/// 以 `u32` id 索引的并查集. id 由 [`Self::make`] 按创建顺序连续分配.
#[derive(Debug, Default)]
pub(crate) struct UnionFind {
    parent: Vec<u32>,
}

impl UnionFind {
    /// 创建空并查集.
    #[inline]
    pub fn new() -> Self {
        Self::default()
    }

    /// 当前节点个数.
    #[inline]
    pub fn len(&self) -> usize {
        self.parent.len()
    }

    /// 新建一个单元素集合, 返回其 id.
    #[inline]
    pub fn make(&mut self) -> u32 {
        let id = self.parent.len() as u32;
        self.parent.push(id);
        id
    }

    /// 查找 `x` 所在集合的代表元. 路径折半.
    pub fn find(&mut self, mut x: u32) -> u32 {
        debug_assert!((x as usize) < self.parent.len());
        while self.parent[x as usize] != x {
            let grand = self.parent[self.parent[x as usize] as usize];
            self.parent[x as usize] = grand;
            x = grand;
        }
        x
    }

    /// 合并 `a`, `b` 所在集合, 返回合并后的代表元.
    ///
    /// 代表元永远取两个根中较小的 id, 与合并次序无关,
    /// 这是标号结果可复现的根基.
    pub fn union(&mut self, a: u32, b: u32) -> u32 {
        let (ra, rb) = (self.find(a), self.find(b));
        let (lo, hi) = (ra.min(rb), ra.max(rb));
        self.parent[hi as usize] = lo;
        lo
    }
}

#[cfg(test)]
mod tests {
    use super::UnionFind;

    #[test]
    fn test_make_and_find() {
        let mut uf = UnionFind::new();
        let a = uf.make();
        let b = uf.make();
        assert_eq!((a, b), (0, 1));
        assert_eq!(uf.find(a), a);
        assert_eq!(uf.find(b), b);
        assert_eq!(uf.len(), 2);
    }

    /// 无论以何种顺序合并, 代表元都是最小 id.
    #[test]
    fn test_lower_root_wins() {
        let mut uf = UnionFind::new();
        let ids: Vec<u32> = (0..5).map(|_| uf.make()).collect();

        assert_eq!(uf.union(ids[3], ids[4]), 3);
        assert_eq!(uf.union(ids[4], ids[1]), 1);
        assert_eq!(uf.union(ids[2], ids[3]), 1);

        for &i in &ids[1..] {
            assert_eq!(uf.find(i), 1);
        }
        assert_eq!(uf.find(ids[0]), 0);
    }
}
